use crate::domain::db_kind::DbKind;
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use crate::domain::query::GeneratedQuery;
use crate::domain::schema::SchemaEntry;
use crate::infrastructure::llm_clients::{generate_with_timeout, SharedLLMClient};
use crate::infrastructure::response::{extract_json, extract_sql};
use tracing::debug;

/// Turns a natural-language request into SQL or a JSON plan for the target store
pub struct QueryTranslator {
    llm: SharedLLMClient,
    config: LLMConfig,
}

impl QueryTranslator {
    pub fn new(llm: SharedLLMClient, config: LLMConfig) -> Self {
        Self { llm, config }
    }

    pub fn system_prompt(kind: DbKind) -> String {
        match kind {
            DbKind::MySql | DbKind::Postgres | DbKind::Sqlite => format!(
                "You are a strict {dialect} SQL generator.\n\
                 Given the schema and the user request, return ONLY a single {dialect} query.\n\
                 No commentary. No markdown. Avoid dangerous statements; prefer SELECT.",
                dialect = kind.dialect_name()
            ),
            DbKind::MongoDb => "You are a MongoDB query planner.\n\
                Return a SINGLE JSON object describing how to run the query safely (no code strings):\n\
                {\"collection\": \"<name>\", \"operation\": \"find\" | \"aggregate\", \"filter\": {...}, \
                \"projection\": {...} | null, \"sort\": [[\"field\", -1]], \"limit\": <int>, \"pipeline\": [...]}\n\
                Rules:\n\
                - If a simple query, use operation \"find\" with \"filter\", optional \"projection\", \"sort\", \"limit\".\n\
                - If aggregation is clearly required, use operation \"aggregate\" and provide \"pipeline\".\n\
                - Do NOT include any explanation text. Return ONLY valid JSON."
                .to_string(),
            DbKind::Firebase => "You are a Firestore query planner.\n\
                Return a SINGLE JSON object with:\n\
                {\n  \"collection\": \"<name>\",\n  \"filters\": [[\"field\",\"op\",\"value\"], ...],\n  \
                \"order_by\": [\"field\",\"asc|desc\"] | null,\n  \"limit\": <int> | null,\n  \
                \"select\": [\"field1\",\"field2\"] | null\n}\n\
                op is one of: ==, !=, <, <=, >, >=, in, not-in, array-contains, array-contains-any.\n\
                ONLY return JSON."
                .to_string(),
            DbKind::Elasticsearch => "You are an Elasticsearch DSL generator.\n\
                Return ONLY a valid JSON body for the `search` API (no index)."
                .to_string(),
            DbKind::Redis => "You are a Redis command planner.\n\
                Return ONLY a JSON object: { \"command\": \"<CMD>\", \"args\": [ ... ] }\n\
                Use simple read commands like GET, HGETALL, SCAN, LRANGE, ZREVRANGE based on the user's request."
                .to_string(),
            DbKind::Custom => String::new(),
        }
    }

    pub fn user_prompt(schema: &[SchemaEntry], question: &str) -> String {
        let schema_json = serde_json::to_string_pretty(schema).unwrap_or_else(|_| "[]".to_string());
        format!(
            "Schema:\n{}\n\nUser request: \"{}\"",
            schema_json,
            question.trim()
        )
    }

    /// Parse a raw model reply into the query shape the store expects
    pub fn parse_reply(kind: DbKind, raw: &str) -> Result<GeneratedQuery> {
        if kind.is_sql() {
            let sql = extract_sql(raw);
            if sql.trim().is_empty() {
                return Err(AppError::ParseError(
                    "The model returned an empty query".to_string(),
                ));
            }
            Ok(GeneratedQuery::Sql(sql))
        } else {
            Ok(GeneratedQuery::Plan(extract_json(raw)?))
        }
    }

    pub async fn translate(
        &self,
        kind: DbKind,
        schema: &[SchemaEntry],
        question: &str,
    ) -> Result<GeneratedQuery> {
        if kind == DbKind::Custom {
            return Err(AppError::Unsupported(format!(
                "Unsupported database type for NL translation: {}",
                kind
            )));
        }

        let system = Self::system_prompt(kind);
        let user = Self::user_prompt(schema, question);
        let raw = generate_with_timeout(&self.llm, &self.config, &system, &user).await?;
        debug!("Model reply for {}: {}", kind, raw);

        Self::parse_reply(kind, &raw)
    }
}
