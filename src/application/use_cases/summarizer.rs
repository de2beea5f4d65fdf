use crate::domain::llm_config::LLMConfig;
use crate::domain::query::ResultSet;
use crate::infrastructure::llm_clients::{generate_with_timeout, SharedLLMClient};
use tracing::warn;

const PREVIEW_ROWS: usize = 30;
const PREVIEW_CHARS: usize = 8000;

const SYSTEM_PROMPT: &str = "You are a data analyst assistant.";

/// Writes a short business-style narrative over a query result
pub struct ResultSummarizer {
    llm: SharedLLMClient,
    config: LLMConfig,
}

impl ResultSummarizer {
    pub fn new(llm: SharedLLMClient, config: LLMConfig) -> Self {
        Self { llm, config }
    }

    pub fn build_prompt(question: &str, result: &ResultSet) -> String {
        let preview = serde_json::to_string(&result.records(PREVIEW_ROWS))
            .unwrap_or_else(|_| "[]".to_string());

        format!(
            "The user asked:\n\"{}\"\n\n\
             You have the following tabular data (sample, up to {} rows):\n{}\n\n\
             Write a concise business-style summary of the key insights (3-6 sentences).\n\
             If the result set is empty, explain likely reasons and suggest a next query.\n\
             Avoid repeating the raw numbers excessively; focus on the story.",
            question.trim(),
            PREVIEW_ROWS,
            truncate_chars(&preview, PREVIEW_CHARS)
        )
    }

    /// Never fails: model errors or empty answers fall back to a plain description
    pub async fn summarize(&self, question: &str, result: &ResultSet) -> String {
        let prompt = Self::build_prompt(question, result);
        match generate_with_timeout(&self.llm, &self.config, SYSTEM_PROMPT, &prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!("Summary model returned an empty answer, using fallback");
                fallback_summary(result)
            }
            Err(e) => {
                warn!("Summary generation failed, using fallback: {}", e);
                fallback_summary(result)
            }
        }
    }
}

pub fn fallback_summary(result: &ResultSet) -> String {
    if result.is_empty() {
        return "No results found for your query.".to_string();
    }

    let rows = result.row_count();
    let mut text = format!(
        "Returned {} {} across {} {} ({}).",
        rows,
        if rows == 1 { "row" } else { "rows" },
        result.columns.len(),
        if result.columns.len() == 1 { "column" } else { "columns" },
        result.columns.join(", ")
    );
    if result.truncated {
        text.push_str(" Results were truncated at the row limit.");
    }
    text
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::AppError;
    use crate::infrastructure::llm_clients::testing::ScriptedLLMClient;
    use serde_json::json;

    fn result() -> ResultSet {
        ResultSet::new(
            vec!["city".to_string(), "total".to_string()],
            vec![
                vec![json!("Lisbon"), json!(30.5)],
                vec![json!("Oslo"), json!(7.25)],
            ],
        )
    }

    #[test]
    fn test_prompt_carries_question_and_preview() {
        let prompt = ResultSummarizer::build_prompt("  sales by city ", &result());
        assert!(prompt.contains("\"sales by city\""));
        assert!(prompt.contains("{\"city\":\"Lisbon\",\"total\":30.5}"));
        assert!(prompt.contains("3-6 sentences"));
    }

    #[test]
    fn test_preview_is_capped() {
        let rows = (0..200).map(|i| vec![json!("x".repeat(300)), json!(i)]).collect();
        let big = ResultSet::new(vec!["a".to_string(), "b".to_string()], rows);
        let prompt = ResultSummarizer::build_prompt("q", &big);
        assert!(prompt.contains("\"b\":0}"));
        assert!(!prompt.contains("\"b\":29}"));
        assert!(prompt.len() < PREVIEW_CHARS + 1000);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_fallback_texts() {
        assert_eq!(
            fallback_summary(&ResultSet::empty()),
            "No results found for your query."
        );
        assert_eq!(
            fallback_summary(&result()),
            "Returned 2 rows across 2 columns (city, total)."
        );
    }

    #[tokio::test]
    async fn test_summarize_uses_model_answer() {
        let client = ScriptedLLMClient::replying(&["  Lisbon leads sales.  "]).shared();
        let summarizer = ResultSummarizer::new(client, LLMConfig::default());
        assert_eq!(
            summarizer.summarize("sales", &result()).await,
            "Lisbon leads sales."
        );
    }

    #[tokio::test]
    async fn test_summarize_falls_back_on_model_error() {
        let client =
            ScriptedLLMClient::new(vec![Err(AppError::LLMError("quota".to_string()))]).shared();
        let summarizer = ResultSummarizer::new(client, LLMConfig::default());
        assert_eq!(
            summarizer.summarize("sales", &ResultSet::empty()).await,
            "No results found for your query."
        );
    }
}
