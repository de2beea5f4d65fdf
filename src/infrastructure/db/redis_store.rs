use super::{connect_error, plan_for, with_timeout, DatabaseBackend};
use crate::domain::connection::ConnectionConfig;
use crate::domain::db_kind::DbKind;
use crate::domain::error::{AppError, Result};
use crate::domain::query::{GeneratedQuery, RedisPlan, ResultSet};
use crate::domain::schema::{EntityDoc, EntityKind, SchemaDoc};
use crate::infrastructure::config::PoolSettings;
use crate::infrastructure::security::resolve_optional_secret;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use redis::aio::MultiplexedConnection;
use serde_json::{Map, Number, Value};
use std::time::Duration;
use tracing::info;
use url::Url;

const KEYSPACE_NOTE: &str = "Key-value store; schema varies by key type";

pub struct RedisBackend {
    connection: MultiplexedConnection,
    db_index: i64,
    query_timeout_secs: u64,
}

impl RedisBackend {
    pub async fn connect(config: &ConnectionConfig, settings: &PoolSettings) -> Result<Self> {
        let url = Self::build_url(config)?;
        let db_index = Self::db_index(config)?;
        let client = redis::Client::open(url.as_str()).map_err(|e| connect_error(DbKind::Redis, e))?;

        let connection = tokio::time::timeout(
            Duration::from_secs(settings.connect_timeout_secs),
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            connect_error(
                DbKind::Redis,
                format!("timed out after {} seconds", settings.connect_timeout_secs),
            )
        })?
        .map_err(|e| connect_error(DbKind::Redis, e))?;

        info!(
            "Created Redis connection for '{}'",
            config.display_label(DbKind::Redis)
        );

        Ok(Self {
            connection,
            db_index,
            query_timeout_secs: settings.query_timeout_secs,
        })
    }

    /// `database` selects the logical DB; absent means 0
    fn db_index(config: &ConnectionConfig) -> Result<i64> {
        match config.database.as_deref().map(str::trim) {
            None | Some("") => Ok(0),
            Some(db) => db.parse::<i64>().map_err(|_| {
                AppError::ValidationError(format!("Redis database must be a number, got '{}'", db))
            }),
        }
    }

    fn build_url(config: &ConnectionConfig) -> Result<Url> {
        let base = format!(
            "redis://{}:{}/{}",
            config.host_or_localhost(),
            config.port_or_default(DbKind::Redis),
            Self::db_index(config)?
        );
        let mut url = Url::parse(&base)
            .map_err(|e| AppError::ValidationError(format!("Invalid Redis host: {}", e)))?;

        if let Some(password) = resolve_optional_secret(config.password.as_deref())? {
            if let Some(user) = config.user.as_deref().filter(|u| !u.is_empty()) {
                url.set_username(user)
                    .map_err(|_| AppError::ValidationError("Invalid Redis user".to_string()))?;
            }
            url.set_password(Some(&password))
                .map_err(|_| AppError::ValidationError("Invalid Redis password".to_string()))?;
        }

        Ok(url)
    }

    async fn command(&self, name: &str, args: &[String]) -> Result<redis::Value> {
        let mut connection = self.connection.clone();
        let mut cmd = redis::cmd(name);
        for arg in args {
            cmd.arg(arg);
        }
        let value: redis::Value = cmd
            .query_async(&mut connection)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Redis {} failed: {}", name, e)))?;
        Ok(value)
    }

    async fn run_plan(&self, plan: RedisPlan, max_rows: usize) -> Result<ResultSet> {
        let command = plan.command_upper();
        let args = plan.string_args();
        let reply = self.command(&command, &args).await?;
        let mut result = shape_reply(&command, reply);
        result.truncated = result.rows.len() > max_rows;
        result.rows.truncate(max_rows);
        Ok(result)
    }
}

#[async_trait]
impl DatabaseBackend for RedisBackend {
    fn kind(&self) -> DbKind {
        DbKind::Redis
    }

    async fn ping(&self) -> Result<()> {
        match self.command("PING", &[]).await {
            Ok(_) => Ok(()),
            Err(e) => Err(connect_error(DbKind::Redis, e)),
        }
    }

    async fn describe(&self) -> Result<SchemaDoc> {
        let size = with_timeout(
            self.query_timeout_secs,
            "Schema introspection",
            self.command("DBSIZE", &[]),
        )
        .await?;

        let mut entity = EntityDoc::new(format!("db{}", self.db_index), EntityKind::Keyspace);
        entity.row_count = match size {
            redis::Value::Int(n) => Some(n),
            _ => None,
        };
        entity.notes.push(KEYSPACE_NOTE.to_string());

        let mut doc = SchemaDoc::new(format!("db{}", self.db_index), DbKind::Redis);
        doc.entities.push(entity);
        Ok(doc)
    }

    async fn execute(&self, query: &GeneratedQuery, max_rows: usize) -> Result<ResultSet> {
        let plan: RedisPlan = plan_for(DbKind::Redis, query)?;
        with_timeout(self.query_timeout_secs, "Query", self.run_plan(plan, max_rows)).await
    }

    async fn close(&self) {}
}

/// Turn a raw reply into rows the way each command's result reads best
fn shape_reply(command: &str, reply: redis::Value) -> ResultSet {
    match command {
        "GET" => match reply {
            redis::Value::Nil => ResultSet::new(vec!["value".to_string()], Vec::new()),
            other => ResultSet::new(vec!["value".to_string()], vec![vec![to_json(other)]]),
        },
        "SET" => {
            let ok = !matches!(reply, redis::Value::Nil);
            ResultSet::new(vec!["ok".to_string()], vec![vec![Value::Bool(ok)]])
        }
        "HGETALL" => {
            let pairs = field_pairs(reply);
            if pairs.is_empty() {
                return ResultSet::empty();
            }
            ResultSet::new(
                vec!["field".to_string(), "value".to_string()],
                pairs.into_iter().map(|(f, v)| vec![f, v]).collect(),
            )
        }
        "SCAN" => {
            // [cursor, [key, ...]]
            let keys = match reply {
                redis::Value::Array(mut parts) if parts.len() == 2 => match parts.pop() {
                    Some(redis::Value::Array(keys)) => keys,
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            };
            ResultSet::new(
                vec!["key".to_string()],
                keys.into_iter().map(|k| vec![to_json(k)]).collect(),
            )
        }
        _ => match reply {
            redis::Value::Array(items) | redis::Value::Set(items) => shape_list(items),
            other => ResultSet::new(vec!["result".to_string()], vec![vec![to_json(other)]]),
        },
    }
}

fn shape_list(items: Vec<redis::Value>) -> ResultSet {
    let rows: Vec<Vec<Value>> = items
        .into_iter()
        .map(|item| match item {
            redis::Value::Array(inner) => inner.into_iter().map(to_json).collect(),
            scalar => vec![to_json(scalar)],
        })
        .collect();

    let width = rows.first().map(|r| r.len()).unwrap_or(1);
    let columns = if width == 1 {
        vec!["value".to_string()]
    } else {
        (1..=width).map(|i| format!("col{}", i)).collect()
    };
    let rows = rows
        .into_iter()
        .map(|mut row| {
            row.resize(width, Value::Null);
            row
        })
        .collect();

    ResultSet::new(columns, rows)
}

/// HGETALL arrives as a RESP3 map or a flat RESP2 array of alternating fields and values
fn field_pairs(reply: redis::Value) -> Vec<(Value, Value)> {
    match reply {
        redis::Value::Map(pairs) => pairs
            .into_iter()
            .map(|(k, v)| (to_json(k), to_json(v)))
            .collect(),
        redis::Value::Array(items) => items
            .chunks(2)
            .filter(|chunk| chunk.len() == 2)
            .map(|chunk| (to_json(chunk[0].clone()), to_json(chunk[1].clone())))
            .collect(),
        _ => Vec::new(),
    }
}

fn to_json(value: redis::Value) -> Value {
    match value {
        redis::Value::Nil => Value::Null,
        redis::Value::Int(n) => Value::from(n),
        redis::Value::BulkString(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Value::String(text),
            Err(e) => Value::String(BASE64.encode(e.into_bytes())),
        },
        redis::Value::SimpleString(text) => Value::String(text),
        redis::Value::Okay => Value::String("OK".to_string()),
        redis::Value::Double(n) => Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null),
        redis::Value::Boolean(b) => Value::Bool(b),
        redis::Value::VerbatimString { text, .. } => Value::String(text),
        redis::Value::Array(items) | redis::Value::Set(items) => {
            Value::Array(items.into_iter().map(to_json).collect())
        }
        redis::Value::Map(pairs) => {
            let mut map = Map::new();
            for (k, v) in pairs {
                let key = match to_json(k) {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                map.insert(key, to_json(v));
            }
            Value::Object(map)
        }
        other => Value::String(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::Value as R;
    use serde_json::json;

    fn bulk(s: &str) -> R {
        R::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn test_url_with_password_and_db() {
        let mut config = ConnectionConfig::default();
        config.host = Some("cache".to_string());
        config.database = Some("2".to_string());
        config.password = Some("plain:s3cret".to_string());
        let url = RedisBackend::build_url(&config).unwrap();
        assert_eq!(url.as_str(), "redis://:s3cret@cache:6379/2");
    }

    #[test]
    fn test_non_numeric_db_rejected() {
        let mut config = ConnectionConfig::default();
        config.database = Some("users".to_string());
        assert!(matches!(
            RedisBackend::db_index(&config),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_get_shapes() {
        let hit = shape_reply("GET", bulk("Ana"));
        assert_eq!(hit.columns, vec!["value"]);
        assert_eq!(hit.rows, vec![vec![json!("Ana")]]);

        let miss = shape_reply("GET", R::Nil);
        assert_eq!(miss.columns, vec!["value"]);
        assert!(miss.rows.is_empty());
    }

    #[test]
    fn test_set_reports_ok() {
        assert_eq!(shape_reply("SET", R::Okay).rows, vec![vec![json!(true)]]);
        assert_eq!(shape_reply("SET", R::Nil).rows, vec![vec![json!(false)]]);
    }

    #[test]
    fn test_hgetall_pairs_from_resp2_and_resp3() {
        let resp2 = shape_reply(
            "HGETALL",
            R::Array(vec![bulk("name"), bulk("Ana"), bulk("city"), bulk("Oslo")]),
        );
        assert_eq!(resp2.columns, vec!["field", "value"]);
        assert_eq!(resp2.rows[1], vec![json!("city"), json!("Oslo")]);

        let resp3 = shape_reply("HGETALL", R::Map(vec![(bulk("name"), bulk("Ana"))]));
        assert_eq!(resp3.rows, vec![vec![json!("name"), json!("Ana")]]);

        let empty = shape_reply("HGETALL", R::Array(vec![]));
        assert!(empty.columns.is_empty());
        assert!(empty.rows.is_empty());
    }

    #[test]
    fn test_scan_lists_keys() {
        let reply = R::Array(vec![bulk("0"), R::Array(vec![bulk("user:1"), bulk("user:2")])]);
        let result = shape_reply("SCAN", reply);
        assert_eq!(result.columns, vec!["key"]);
        assert_eq!(result.rows, vec![vec![json!("user:1")], vec![json!("user:2")]]);
    }

    #[test]
    fn test_generic_replies() {
        let list = shape_reply("LRANGE", R::Array(vec![bulk("a"), bulk("b")]));
        assert_eq!(list.columns, vec!["value"]);
        assert_eq!(list.rows.len(), 2);

        let nested = shape_reply(
            "XRANGE",
            R::Array(vec![R::Array(vec![bulk("1-0"), R::Array(vec![bulk("f"), bulk("v")])])]),
        );
        assert_eq!(nested.columns, vec!["col1", "col2"]);
        assert_eq!(nested.rows[0][1], json!(["f", "v"]));

        let scalar = shape_reply("STRLEN", R::Int(5));
        assert_eq!(scalar.columns, vec!["result"]);
        assert_eq!(scalar.rows, vec![vec![json!(5)]]);
    }
}
