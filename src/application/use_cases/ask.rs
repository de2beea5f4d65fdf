use crate::application::use_cases::chart::{build_chart, ChartSpec};
use crate::application::use_cases::connection_manager::ConnectionManager;
use crate::application::use_cases::query_guard::{GuardRules, QueryGuard};
use crate::application::use_cases::query_translator::QueryTranslator;
use crate::application::use_cases::summarizer::ResultSummarizer;
use crate::application::use_cases::table_render::render_html_table;
use crate::domain::db_kind::DbKind;
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use crate::domain::role::{Permission, Principal};
use crate::infrastructure::db::with_timeout;
use crate::infrastructure::llm_clients::SharedLLMClient;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Everything the page needs to show one answered question
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub sql: String,
    pub summary: String,
    pub table_html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartSpec>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub truncated: bool,
    pub connection_id: String,
    pub db_type: DbKind,
    pub warnings: Vec<String>,
}

/// Question → query → guard → execute → summary, chart and table
pub struct AskUseCase {
    connections: Arc<ConnectionManager>,
    translator: QueryTranslator,
    summarizer: ResultSummarizer,
    rules: GuardRules,
}

impl AskUseCase {
    pub fn new(
        connections: Arc<ConnectionManager>,
        llm: SharedLLMClient,
        llm_config: LLMConfig,
        rules: GuardRules,
    ) -> Self {
        Self {
            connections,
            translator: QueryTranslator::new(llm.clone(), llm_config.clone()),
            summarizer: ResultSummarizer::new(llm, llm_config),
            rules,
        }
    }

    pub async fn execute(
        &self,
        principal: &Principal,
        prompt: &str,
        connection_id: Option<&str>,
    ) -> Result<AskResponse> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AppError::ValidationError("Empty prompt".to_string()));
        }

        let started = Instant::now();
        let connection = self.connections.resolve(connection_id).await?;
        let kind = connection.backend.kind();
        let schema = self.connections.schema_snapshot(&connection, false).await?;

        let query = self.translator.translate(kind, &schema, prompt).await?;

        let guard = QueryGuard::new(self.rules.clone(), principal.can(Permission::WriteData));
        let verdict = guard.validate(kind, &query);
        if !verdict.is_valid {
            warn!(
                "Rejected generated query for {} on {}: {}",
                principal.name,
                connection.info.id,
                verdict.message()
            );
            return Err(AppError::SecurityError(verdict.message()));
        }

        let settings = self.connections.settings();
        // backends time themselves out; the outer bound also covers pool checkout
        let result = with_timeout(
            settings.query_timeout_secs + settings.connect_timeout_secs,
            "Query",
            connection.backend.execute(&query, settings.max_rows),
        )
        .await?;

        info!(
            "Answered question for {} on {} ({} rows{}) in {:?}",
            principal.name,
            connection.info.id,
            result.row_count(),
            if result.truncated { ", truncated" } else { "" },
            started.elapsed()
        );

        let summary = self.summarizer.summarize(prompt, &result).await;
        let chart = build_chart(&result);
        let table_html = render_html_table(&result);

        Ok(AskResponse {
            sql: query.to_string(),
            summary,
            table_html,
            chart,
            row_count: result.row_count(),
            truncated: result.truncated,
            columns: result.columns,
            rows: result.rows,
            connection_id: connection.info.id.clone(),
            db_type: kind,
            warnings: verdict.warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::chart::ChartKind;
    use crate::domain::role::Role;
    use crate::infrastructure::config::PoolSettings;
    use crate::infrastructure::db::sql::tests::seeded_backend;
    use crate::infrastructure::llm_clients::testing::ScriptedLLMClient;
    use serde_json::json;

    async fn use_case(replies: &[&str], rules: GuardRules) -> (AskUseCase, Arc<ScriptedLLMClient>) {
        let connections = Arc::new(ConnectionManager::new(PoolSettings::default(), true));
        connections
            .attach("shop", Arc::new(seeded_backend().await))
            .await;
        let client = Arc::new(ScriptedLLMClient::replying(replies));
        let ask = AskUseCase::new(connections, client.clone(), LLMConfig::default(), rules);
        (ask, client)
    }

    fn user() -> Principal {
        Principal {
            name: "analyst".to_string(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn test_answers_question_end_to_end() {
        let (ask, client) = use_case(
            &[
                "```sql\nSELECT c.city, SUM(o.total) AS revenue FROM orders o JOIN customers c ON c.id = o.customer_id GROUP BY c.city ORDER BY revenue DESC;\n```",
                "Lisbon brings in most revenue.",
            ],
            GuardRules::default(),
        )
        .await;

        let response = ask.execute(&user(), " revenue by city ", None).await.unwrap();

        assert!(response.sql.starts_with("SELECT c.city"));
        assert_eq!(response.columns, vec!["city", "revenue"]);
        assert_eq!(response.rows[0], vec![json!("Lisbon"), json!(30.5)]);
        assert_eq!(response.row_count, 2);
        assert!(!response.truncated);
        assert_eq!(response.summary, "Lisbon brings in most revenue.");
        assert!(response.table_html.contains("<td>Lisbon</td>"));
        assert_eq!(response.db_type, DbKind::Sqlite);

        let chart = response.chart.unwrap();
        assert_eq!(chart.kind, ChartKind::Bar);
        assert_eq!(chart.title, "Top 2 by revenue");

        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].1.contains("\"table\": \"customers\""));
        assert!(prompts[1].1.contains("\"revenue by city\""));
    }

    #[tokio::test]
    async fn test_empty_prompt_is_rejected() {
        let (ask, client) = use_case(&[], GuardRules::default()).await;
        match ask.execute(&user(), "   ", None).await {
            Err(AppError::ValidationError(msg)) => assert_eq!(msg, "Empty prompt"),
            other => panic!("expected ValidationError, got {:?}", other.map(|r| r.sql)),
        }
        assert!(client.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_is_rejected_before_execution() {
        let (ask, _) = use_case(&["DELETE FROM orders"], GuardRules::default()).await;
        let result = ask.execute(&user(), "clean up orders", None).await;
        assert!(matches!(result, Err(AppError::SecurityError(_))));

        let follow_up = use_case(&["SELECT COUNT(*) AS n FROM orders"], GuardRules::default()).await;
        let response = follow_up.0.execute(&user(), "how many orders", None).await.unwrap();
        assert_eq!(response.rows, vec![vec![json!(3)]]);
    }

    #[tokio::test]
    async fn test_owner_needed_for_writes_even_when_allowed() {
        let rules = GuardRules {
            allow_writes: true,
            ..GuardRules::default()
        };
        let (ask, _) = use_case(&["UPDATE customers SET city = 'Rome'"], rules).await;
        let result = ask.execute(&user(), "move everyone to Rome", None).await;
        assert!(matches!(result, Err(AppError::SecurityError(_))));
    }

    #[tokio::test]
    async fn test_summary_failure_falls_back() {
        let (ask, _) = use_case(&["SELECT name FROM customers WHERE id > 100"], GuardRules::default()).await;
        let response = ask.execute(&user(), "customers above 100", None).await.unwrap();
        assert_eq!(response.summary, "No results found for your query.");
        assert_eq!(response.columns, vec!["name"]);
        assert!(response.rows.is_empty());
        assert!(response.chart.is_none());
        assert_eq!(response.table_html, "");
    }

    #[tokio::test]
    async fn test_missing_connection() {
        let connections = Arc::new(ConnectionManager::new(PoolSettings::default(), true));
        let ask = AskUseCase::new(
            connections,
            ScriptedLLMClient::replying(&[]).shared(),
            LLMConfig::default(),
            GuardRules::default(),
        );
        match ask.execute(&user(), "anything", None).await {
            Err(AppError::ValidationError(msg)) => assert_eq!(msg, "No active database connection"),
            _ => panic!("expected ValidationError"),
        }
    }
}
