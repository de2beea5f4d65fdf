use crate::domain::error::{AppError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static THINK_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<think>[\s\S]*?</think>|<think\s*/>").unwrap());

static REASONING_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<reasoning>[\s\S]*?</reasoning>").unwrap());

static INTERNAL_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<internal>[\s\S]*?</internal>").unwrap());

static MULTIPLE_NEWLINES_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

static CODE_FENCE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"```(?:\w+)?").unwrap());

// Statement starting a line. `WITH` only counts when a CTE name and `AS` follow it.
static SQL_LINE_START_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?ims)^[ \t]*(?:WITH\s+(?:RECURSIVE\s+)?[\w"`]+\s*(?:\([^)]*\)\s*)?AS\b|(?:SELECT|INSERT|UPDATE|DELETE|SHOW|DESCRIBE|EXPLAIN)\b).*"#,
    )
    .unwrap()
});

static SQL_INLINE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\b(SELECT|INSERT|UPDATE|DELETE)\b.*").unwrap());

/// Cleans LLM response by removing common artifacts and unwanted tags
pub fn clean_llm_response(response: &str) -> String {
    let mut cleaned = THINK_TAG_PATTERN.replace_all(response, "").to_string();
    cleaned = REASONING_TAG_PATTERN.replace_all(&cleaned, "").to_string();
    cleaned = INTERNAL_TAG_PATTERN.replace_all(&cleaned, "").to_string();

    cleaned = cleaned.trim().to_string();

    // Collapse multiple consecutive newlines into at most two
    MULTIPLE_NEWLINES_PATTERN
        .replace_all(&cleaned, "\n\n")
        .to_string()
}

/// Drops markdown code fences (with or without a language tag)
pub fn strip_code_fences(text: &str) -> String {
    let without = CODE_FENCE_PATTERN.replace_all(text, "");
    without
        .trim_matches(|c: char| c == '`' || c.is_whitespace())
        .to_string()
}

/// Pulls the statement out of a model reply that may carry leading prose.
///
/// A keyword at the start of a line wins over one inside a sentence. Falls
/// back to the cleaned text when no statement keyword is present.
pub fn extract_sql(raw: &str) -> String {
    let cleaned = strip_code_fences(&clean_llm_response(raw));
    let statement = SQL_LINE_START_PATTERN
        .find(&cleaned)
        .or_else(|| SQL_INLINE_PATTERN.find(&cleaned))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or(cleaned);

    statement
        .strip_suffix(';')
        .map(|s| s.trim_end().to_string())
        .unwrap_or(statement)
}

/// Parses a JSON object out of a model reply.
pub fn extract_json(raw: &str) -> Result<serde_json::Value> {
    let cleaned = strip_code_fences(&clean_llm_response(raw));
    if cleaned.is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&cleaned) {
        return Ok(value);
    }

    // Prose around the object: take the outermost braces
    match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => {
            serde_json::from_str(&cleaned[start..=end]).map_err(|e| {
                AppError::ParseError(format!("Model returned an invalid JSON plan: {}", e))
            })
        }
        _ => Err(AppError::ParseError(
            "Model returned no JSON plan".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_think_tags() {
        let input = "<think>Some reasoning here</think>The actual response";
        assert_eq!(clean_llm_response(input), "The actual response");
    }

    #[test]
    fn test_clean_think_with_space() {
        let input = "<think />The actual response";
        assert_eq!(clean_llm_response(input), "The actual response");
    }

    #[test]
    fn test_clean_multiple_newlines() {
        let input = "Line 1\n\n\n\n\nLine 2";
        assert_eq!(clean_llm_response(input), "Line 1\n\nLine 2");
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(
            strip_code_fences("```sql\nSELECT * FROM users\n```"),
            "SELECT * FROM users"
        );
        assert_eq!(strip_code_fences("`SELECT 1`"), "SELECT 1");
    }

    #[test]
    fn test_extract_sql_drops_leading_prose() {
        let raw = "Sure! Here is the query:\n```sql\nSELECT name FROM students ORDER BY marks DESC LIMIT 5;\n```";
        assert_eq!(
            extract_sql(raw),
            "SELECT name FROM students ORDER BY marks DESC LIMIT 5"
        );
    }

    #[test]
    fn test_extract_sql_keeps_cte() {
        let raw = "WITH top AS (SELECT id FROM orders) SELECT * FROM top";
        assert_eq!(extract_sql(raw), raw);
    }

    #[test]
    fn test_extract_sql_ignores_keywords_inside_prose() {
        assert_eq!(
            extract_sql("This query will show the top students:\nSELECT name FROM students"),
            "SELECT name FROM students"
        );
        assert_eq!(
            extract_sql("Here is the query, with fences removed:\n```sql\nSELECT id FROM orders;\n```"),
            "SELECT id FROM orders"
        );
        assert_eq!(
            extract_sql("With this you get totals:\nSELECT SUM(total) FROM orders"),
            "SELECT SUM(total) FROM orders"
        );
    }

    #[test]
    fn test_extract_sql_inline_statement_after_prose() {
        assert_eq!(
            extract_sql("Run this: select name from students"),
            "select name from students"
        );
    }

    #[test]
    fn test_extract_sql_keeps_recursive_cte_and_explain() {
        let raw = "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 5) SELECT x FROM n";
        assert_eq!(extract_sql(raw), raw);
        assert_eq!(
            extract_sql("Plan below.\nEXPLAIN SELECT id FROM orders"),
            "EXPLAIN SELECT id FROM orders"
        );
    }

    #[test]
    fn test_extract_sql_without_keyword_returns_text() {
        assert_eq!(extract_sql("  pragma table_list  "), "pragma table_list");
    }

    #[test]
    fn test_extract_json_plain_and_fenced() {
        let value = extract_json("```json\n{\"command\": \"GET\", \"args\": [\"k\"]}\n```").unwrap();
        assert_eq!(value["command"], "GET");
    }

    #[test]
    fn test_extract_json_with_prose() {
        let value = extract_json("Here you go: {\"collection\": \"students\"} hope it helps").unwrap();
        assert_eq!(value["collection"], "students");
    }

    #[test]
    fn test_extract_json_empty_reply_is_empty_object() {
        let value = extract_json("   ").unwrap();
        assert!(value.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_extract_json_garbage_fails() {
        assert!(matches!(
            extract_json("no plan for you"),
            Err(AppError::ParseError(_))
        ));
    }
}
