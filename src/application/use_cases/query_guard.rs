//! Query Guard
//!
//! Every query the model produces passes through here before it reaches a
//! database:
//! - read-only enforcement (statements, Redis commands, Mongo stages)
//! - single-statement SQL without comments
//! - sensitive-column keyword blocking
//! - plan shape checks for document, key-value and search stores
//!
//! Deny by default, allow by explicit rule.

use crate::domain::db_kind::DbKind;
use crate::domain::query::{FirestorePlan, GeneratedQuery, MongoPlan, RedisPlan};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static WORD_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z_]+").unwrap());

const WRITE_STATEMENTS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "UPSERT", "REPLACE", "CREATE", "ALTER", "DROP",
    "TRUNCATE", "RENAME", "GRANT", "REVOKE", "ATTACH", "DETACH", "VACUUM", "REINDEX", "COPY",
    "LOCK", "CALL", "DO", "SET",
];

pub const FIRESTORE_OPERATORS: &[&str] = &[
    "==",
    "!=",
    "<",
    "<=",
    ">",
    ">=",
    "in",
    "not-in",
    "array-contains",
    "array-contains-any",
];

/// Guard configuration, loaded from the `[guard]` config section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuardRules {
    /// Allow data-modifying statements at all (callers additionally need the WriteData permission)
    #[serde(default)]
    pub allow_writes: bool,
    /// Statements rejected even when writes are allowed
    #[serde(default = "default_deny_statements")]
    pub deny_statements: Vec<String>,
    /// Column-name fragments that may not be selected or filtered on
    #[serde(default = "default_deny_keywords")]
    pub deny_keywords: Vec<String>,
    #[serde(default)]
    pub allow_comments: bool,
    /// Redis commands permitted while read-only
    #[serde(default = "default_redis_read_commands")]
    pub redis_read_commands: Vec<String>,
    /// Redis commands never permitted
    #[serde(default = "default_redis_blocked_commands")]
    pub redis_blocked_commands: Vec<String>,
    /// Aggregation stages that write and are rejected while read-only
    #[serde(default = "default_mongo_blocked_stages")]
    pub mongo_blocked_stages: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_deny_statements() -> Vec<String> {
    strings(&[
        "DROP", "TRUNCATE", "GRANT", "REVOKE", "ATTACH", "DETACH", "PRAGMA", "OUTFILE", "DUMPFILE",
    ])
}

fn default_deny_keywords() -> Vec<String> {
    strings(&[
        "password",
        "token",
        "secret",
        "api_key",
        "private_key",
        "credential",
    ])
}

fn default_redis_read_commands() -> Vec<String> {
    strings(&[
        "GET", "MGET", "STRLEN", "EXISTS", "TYPE", "TTL", "PTTL", "SCAN", "DBSIZE", "HGET",
        "HMGET", "HGETALL", "HKEYS", "HVALS", "HLEN", "HEXISTS", "HSCAN", "LRANGE", "LLEN",
        "LINDEX", "SMEMBERS", "SCARD", "SISMEMBER", "SSCAN", "ZRANGE", "ZREVRANGE",
        "ZRANGEBYSCORE", "ZREVRANGEBYSCORE", "ZSCORE", "ZCARD", "ZCOUNT", "ZRANK", "ZREVRANK",
        "ZSCAN", "XRANGE", "XREVRANGE", "XLEN", "PFCOUNT", "GETRANGE",
    ])
}

fn default_redis_blocked_commands() -> Vec<String> {
    strings(&[
        "FLUSHALL", "FLUSHDB", "CONFIG", "SHUTDOWN", "DEBUG", "SCRIPT", "EVAL", "EVALSHA",
        "FUNCTION", "MODULE", "MONITOR", "SAVE", "BGSAVE", "BGREWRITEAOF", "REPLICAOF",
        "SLAVEOF", "CLUSTER", "ACL", "MIGRATE", "KEYS", "CLIENT", "SUBSCRIBE", "PSUBSCRIBE",
    ])
}

fn default_mongo_blocked_stages() -> Vec<String> {
    strings(&["$out", "$merge"])
}

impl Default for GuardRules {
    fn default() -> Self {
        Self {
            allow_writes: false,
            deny_statements: default_deny_statements(),
            deny_keywords: default_deny_keywords(),
            allow_comments: false,
            redis_read_commands: default_redis_read_commands(),
            redis_blocked_commands: default_redis_blocked_commands(),
            mongo_blocked_stages: default_mongo_blocked_stages(),
        }
    }
}

/// Validation result with detailed error information
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationError {
    pub code: String,
    pub message: String,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: vec![],
            warnings: vec![],
        }
    }

    pub fn add_error(&mut self, code: &str, message: &str) {
        self.is_valid = false;
        self.errors.push(ValidationError {
            code: code.to_string(),
            message: message.to_string(),
        });
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn has_error(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    /// All error messages joined for a single response line
    pub fn message(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub struct QueryGuard {
    rules: GuardRules,
    allow_writes: bool,
}

impl QueryGuard {
    /// `caller_may_write` is whether the caller's role carries the WriteData permission
    pub fn new(rules: GuardRules, caller_may_write: bool) -> Self {
        let allow_writes = rules.allow_writes && caller_may_write;
        Self {
            rules,
            allow_writes,
        }
    }

    pub fn writes_allowed(&self) -> bool {
        self.allow_writes
    }

    pub fn validate(&self, kind: DbKind, query: &GeneratedQuery) -> ValidationResult {
        if kind.is_sql() {
            return match query {
                GeneratedQuery::Sql(sql) => self.validate_sql(sql),
                GeneratedQuery::Plan(_) => {
                    let mut result = ValidationResult::valid();
                    result.add_error(
                        "PLAN_FOR_SQL_BACKEND",
                        "Expected a SQL statement but the model returned a JSON plan",
                    );
                    result
                }
            };
        }

        let plan = match query {
            GeneratedQuery::Plan(plan) => plan,
            GeneratedQuery::Sql(_) => {
                let mut result = ValidationResult::valid();
                result.add_error(
                    "INVALID_PLAN",
                    &format!("Expected a JSON plan for {}", kind),
                );
                return result;
            }
        };

        match kind {
            DbKind::MongoDb => self.validate_mongo(plan),
            DbKind::Redis => self.validate_redis(plan),
            DbKind::Firebase => self.validate_firestore(plan),
            DbKind::Elasticsearch => self.validate_search_body(plan),
            _ => {
                let mut result = ValidationResult::valid();
                result.add_error(
                    "INVALID_PLAN",
                    &format!("Queries are not supported for {}", kind),
                );
                result
            }
        }
    }

    /// Validate raw SQL for forbidden patterns
    pub fn validate_sql(&self, sql: &str) -> ValidationResult {
        let mut result = ValidationResult::valid();
        let trimmed = sql.trim();

        if trimmed.is_empty() {
            result.add_error("EMPTY_QUERY", "The model returned an empty query");
            return result;
        }

        if trimmed.trim_end_matches(';').contains(';') {
            result.add_error(
                "MULTIPLE_STATEMENTS",
                "Only a single statement may be executed",
            );
        }

        if !self.rules.allow_comments && (trimmed.contains("--") || trimmed.contains("/*")) {
            result.add_error("COMMENTS_NOT_ALLOWED", "SQL comments are not allowed");
        }

        let words: Vec<String> = WORD_PATTERN
            .find_iter(trimmed)
            .map(|m| m.as_str().to_uppercase())
            .collect();

        if !self.allow_writes {
            let leading = words.first().map(String::as_str).unwrap_or("");
            let read_leading = matches!(
                leading,
                "SELECT" | "WITH" | "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" | "VALUES"
            );
            let write_word = words
                .iter()
                .find(|w| WRITE_STATEMENTS.contains(&w.as_str()));

            // `SET` and `REPLACE` also appear in read queries (`REPLACE(...)`), so they only
            // count when leading
            let write_word = write_word
                .filter(|w| !matches!(w.as_str(), "SET" | "REPLACE" | "DO") || w.as_str() == leading)
                .or_else(|| {
                    // `SELECT ... INTO OUTFILE` writes files, `SELECT ... INTO t` creates a table
                    words
                        .iter()
                        .find(|w| matches!(w.as_str(), "OUTFILE" | "DUMPFILE"))
                        .or_else(|| words.iter().find(|w| w.as_str() == "INTO"))
                });

            if !read_leading || write_word.is_some() {
                let offending = write_word.cloned().unwrap_or_else(|| leading.to_string());
                result.add_error(
                    "READ_ONLY",
                    &format!(
                        "Statement '{}' would modify data; this connection is read-only",
                        offending
                    ),
                );
            }
        }

        for stmt in &self.rules.deny_statements {
            let stmt_upper = stmt.to_uppercase();
            if words.iter().any(|w| *w == stmt_upper) {
                result.add_error(
                    "FORBIDDEN_STATEMENT",
                    &format!("SQL statement '{}' is not allowed", stmt),
                );
            }
        }

        for keyword in &self.rules.deny_keywords {
            let keyword_upper = keyword.to_uppercase();
            if words.iter().any(|w| w.contains(&keyword_upper)) {
                result.add_error(
                    "FORBIDDEN_KEYWORD",
                    &format!(
                        "Column or field containing '{}' is not allowed to be queried",
                        keyword
                    ),
                );
            }
        }

        if trimmed.to_lowercase().contains("select *") {
            result.add_warning("Consider using explicit column names instead of SELECT *");
        }

        result
    }

    fn validate_mongo(&self, plan: &serde_json::Value) -> ValidationResult {
        let mut result = ValidationResult::valid();
        let parsed: MongoPlan = match serde_json::from_value(plan.clone()) {
            Ok(p) => p,
            Err(e) => {
                result.add_error("INVALID_PLAN", &format!("Invalid MongoDB plan: {}", e));
                return result;
            }
        };

        match parsed.operation.as_str() {
            "find" => {}
            "aggregate" => {
                if parsed.pipeline.as_ref().map(|p| p.is_empty()).unwrap_or(true) {
                    result.add_warning("Aggregation without a pipeline returns whole documents");
                }
                if !self.allow_writes {
                    for stage in parsed.pipeline.iter().flatten() {
                        for blocked in &self.rules.mongo_blocked_stages {
                            if stage.get(blocked).is_some() {
                                result.add_error(
                                    "STAGE_NOT_ALLOWED",
                                    &format!(
                                        "Aggregation stage '{}' writes data and is not allowed",
                                        blocked
                                    ),
                                );
                            }
                        }
                    }
                }
            }
            other => result.add_error(
                "OPERATION_NOT_ALLOWED",
                &format!("Unsupported MongoDB operation: {}", other),
            ),
        }

        result
    }

    fn validate_redis(&self, plan: &serde_json::Value) -> ValidationResult {
        let mut result = ValidationResult::valid();
        let parsed: RedisPlan = match serde_json::from_value(plan.clone()) {
            Ok(p) => p,
            Err(e) => {
                result.add_error("INVALID_PLAN", &format!("Invalid Redis plan: {}", e));
                return result;
            }
        };

        let command = parsed.command_upper();
        if command.is_empty() {
            result.add_error("COMMAND_NOT_ALLOWED", "Redis plan has no command");
            return result;
        }

        let listed = |list: &[String]| list.iter().any(|c| c.eq_ignore_ascii_case(&command));

        if listed(&self.rules.redis_blocked_commands) {
            result.add_error(
                "COMMAND_NOT_ALLOWED",
                &format!("Redis command '{}' is not allowed", command),
            );
        } else if !self.allow_writes && !listed(&self.rules.redis_read_commands) {
            result.add_error(
                "COMMAND_NOT_ALLOWED",
                &format!(
                    "Redis command '{}' is not in the read-only allowlist",
                    command
                ),
            );
        }

        result
    }

    fn validate_firestore(&self, plan: &serde_json::Value) -> ValidationResult {
        let mut result = ValidationResult::valid();
        let parsed: FirestorePlan = match serde_json::from_value(plan.clone()) {
            Ok(p) => p,
            Err(e) => {
                result.add_error("INVALID_PLAN", &format!("Invalid Firestore plan: {}", e));
                return result;
            }
        };

        if parsed.collection.trim().is_empty() {
            result.add_error("COLLECTION_REQUIRED", "Firestore plan has no collection");
        }

        for (field, op, _) in parsed.filters.iter().flatten() {
            if !FIRESTORE_OPERATORS.contains(&op.as_str()) {
                result.add_error(
                    "OPERATOR_NOT_ALLOWED",
                    &format!("Operator '{}' on '{}' is not supported by Firestore", op, field),
                );
            }
        }

        result
    }

    fn validate_search_body(&self, plan: &serde_json::Value) -> ValidationResult {
        let mut result = ValidationResult::valid();
        if !plan.is_object() {
            result.add_error(
                "INVALID_BODY",
                "Elasticsearch search body must be a JSON object",
            );
        }
        if plan.get("script").is_some() || plan.get("script_fields").is_some() {
            result.add_warning("Search body uses scripts");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn read_only() -> QueryGuard {
        QueryGuard::new(GuardRules::default(), false)
    }

    fn writable() -> QueryGuard {
        QueryGuard::new(
            GuardRules {
                allow_writes: true,
                ..GuardRules::default()
            },
            true,
        )
    }

    #[test]
    fn test_plain_select_is_valid() {
        let result = read_only().validate_sql("SELECT name, marks FROM students ORDER BY marks DESC LIMIT 5");
        assert!(result.is_valid, "Expected valid: {:?}", result.errors);
    }

    #[test]
    fn test_cte_is_valid() {
        let result = read_only().validate_sql(
            "WITH totals AS (SELECT user_id, SUM(total) AS spent FROM orders GROUP BY user_id) SELECT * FROM totals",
        );
        assert!(result.is_valid, "Expected valid: {:?}", result.errors);
    }

    #[test]
    fn test_replace_function_is_not_a_write() {
        let result = read_only().validate_sql("SELECT REPLACE(name, 'a', 'b') AS n FROM users");
        assert!(result.is_valid, "Expected valid: {:?}", result.errors);
    }

    #[test]
    fn test_update_blocked_when_read_only() {
        let result = read_only().validate_sql("UPDATE students SET marks = 100");
        assert!(!result.is_valid);
        assert!(result.has_error("READ_ONLY"));
    }

    #[test]
    fn test_writes_need_both_config_and_role() {
        let rules = GuardRules {
            allow_writes: true,
            ..GuardRules::default()
        };
        assert!(!QueryGuard::new(rules.clone(), false).writes_allowed());
        assert!(!QueryGuard::new(GuardRules::default(), true).writes_allowed());
        assert!(QueryGuard::new(rules, true).writes_allowed());
    }

    #[test]
    fn test_update_allowed_for_writer() {
        let result = writable().validate_sql("UPDATE students SET marks = 100 WHERE id = 3");
        assert!(result.is_valid, "Expected valid: {:?}", result.errors);
    }

    #[test]
    fn test_drop_is_always_forbidden() {
        let result = writable().validate_sql("DROP TABLE students");
        assert!(result.has_error("FORBIDDEN_STATEMENT"));
    }

    #[test]
    fn test_multiple_statements_rejected() {
        let result = read_only().validate_sql("SELECT 1; DELETE FROM users");
        assert!(result.has_error("MULTIPLE_STATEMENTS"));
        assert!(result.has_error("READ_ONLY"));
    }

    #[test]
    fn test_trailing_semicolon_is_fine() {
        let result = read_only().validate_sql("SELECT 1;");
        assert!(result.is_valid, "Expected valid: {:?}", result.errors);
    }

    #[test]
    fn test_comments_rejected() {
        let result = read_only().validate_sql("SELECT id FROM users -- everything");
        assert!(result.has_error("COMMENTS_NOT_ALLOWED"));
    }

    #[test]
    fn test_sensitive_column_rejected() {
        let result = read_only().validate_sql("SELECT password FROM users WHERE id = 1");
        assert!(result.has_error("FORBIDDEN_KEYWORD"));
        let result = read_only().validate_sql("SELECT u.id, u.api_key FROM users u");
        assert!(result.has_error("FORBIDDEN_KEYWORD"));
    }

    #[test]
    fn test_sensitive_column_without_spacing_rejected() {
        let result = read_only().validate_sql("SELECT username,password FROM users");
        assert!(result.has_error("FORBIDDEN_KEYWORD"));
        let result = read_only().validate_sql("SELECT id FROM users WHERE password='x'");
        assert!(result.has_error("FORBIDDEN_KEYWORD"));
        let result = read_only().validate_sql("SELECT \"reset_token\" FROM sessions");
        assert!(result.has_error("FORBIDDEN_KEYWORD"));
    }

    #[test]
    fn test_select_into_outfile_rejected() {
        let result =
            read_only().validate_sql("SELECT name FROM students INTO OUTFILE '/tmp/dump.csv'");
        assert!(result.has_error("READ_ONLY"));
        assert!(result.has_error("FORBIDDEN_STATEMENT"));

        let result = writable().validate_sql("SELECT * FROM students INTO DUMPFILE '/tmp/x'");
        assert!(result.has_error("FORBIDDEN_STATEMENT"));
    }

    #[test]
    fn test_select_into_table_is_a_write() {
        let result = read_only().validate_sql("SELECT name, marks INTO honor_roll FROM students");
        assert!(result.has_error("READ_ONLY"));
        let result = writable().validate_sql("SELECT name, marks INTO honor_roll FROM students");
        assert!(result.is_valid, "Expected valid: {:?}", result.errors);
    }

    #[test]
    fn test_plan_rejected_for_sql_backend() {
        let result = read_only().validate(DbKind::Postgres, &GeneratedQuery::Plan(json!({})));
        assert!(result.has_error("PLAN_FOR_SQL_BACKEND"));
    }

    #[test]
    fn test_mongo_find_and_bad_operation() {
        let guard = read_only();
        let ok = guard.validate(
            DbKind::MongoDb,
            &GeneratedQuery::Plan(json!({"collection": "students", "filter": {"marks": {"$gt": 90}}})),
        );
        assert!(ok.is_valid);

        let bad = guard.validate(
            DbKind::MongoDb,
            &GeneratedQuery::Plan(json!({"collection": "students", "operation": "deleteMany"})),
        );
        assert!(bad.has_error("OPERATION_NOT_ALLOWED"));
    }

    #[test]
    fn test_mongo_out_stage_blocked_when_read_only() {
        let plan = GeneratedQuery::Plan(json!({
            "collection": "orders",
            "operation": "aggregate",
            "pipeline": [{"$group": {"_id": "$city"}}, {"$out": "copy"}]
        }));
        assert!(read_only().validate(DbKind::MongoDb, &plan).has_error("STAGE_NOT_ALLOWED"));
        assert!(writable().validate(DbKind::MongoDb, &plan).is_valid);
    }

    #[test]
    fn test_redis_read_and_write_commands() {
        let get = GeneratedQuery::Plan(json!({"command": "get", "args": ["user:1"]}));
        assert!(read_only().validate(DbKind::Redis, &get).is_valid);

        let set = GeneratedQuery::Plan(json!({"command": "SET", "args": ["k", "v"]}));
        assert!(read_only().validate(DbKind::Redis, &set).has_error("COMMAND_NOT_ALLOWED"));
        assert!(writable().validate(DbKind::Redis, &set).is_valid);

        let flush = GeneratedQuery::Plan(json!({"command": "FLUSHALL", "args": []}));
        assert!(writable().validate(DbKind::Redis, &flush).has_error("COMMAND_NOT_ALLOWED"));

        let empty = GeneratedQuery::Plan(json!({}));
        assert!(read_only().validate(DbKind::Redis, &empty).has_error("COMMAND_NOT_ALLOWED"));
    }

    #[test]
    fn test_firestore_checks() {
        let ok = GeneratedQuery::Plan(json!({
            "collection": "students",
            "filters": [["marks", ">", 90]],
            "order_by": ["marks", "desc"],
            "limit": 5
        }));
        assert!(read_only().validate(DbKind::Firebase, &ok).is_valid);

        let bad = GeneratedQuery::Plan(json!({"collection": "", "filters": [["marks", "~", 1]]}));
        let result = read_only().validate(DbKind::Firebase, &bad);
        assert!(result.has_error("COLLECTION_REQUIRED"));
        assert!(result.has_error("OPERATOR_NOT_ALLOWED"));
    }

    #[test]
    fn test_search_body_must_be_object() {
        let result = read_only().validate(DbKind::Elasticsearch, &GeneratedQuery::Plan(json!([1])));
        assert!(result.has_error("INVALID_BODY"));
    }
}
