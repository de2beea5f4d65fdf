use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// What the model produced for a question: SQL text for relational stores,
/// a JSON plan for everything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeneratedQuery {
    Sql(String),
    Plan(Value),
}

impl GeneratedQuery {
    pub fn as_plan(&self) -> Option<&Value> {
        match self {
            GeneratedQuery::Plan(plan) => Some(plan),
            GeneratedQuery::Sql(_) => None,
        }
    }
}

impl fmt::Display for GeneratedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneratedQuery::Sql(sql) => f.write_str(sql),
            GeneratedQuery::Plan(plan) => {
                let pretty = serde_json::to_string_pretty(plan).map_err(|_| fmt::Error)?;
                f.write_str(&pretty)
            }
        }
    }
}

/// MongoDB sort accepted either as `[["field", -1]]` or `{"field": -1}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortSpec {
    Pairs(Vec<(String, Value)>),
    Map(Map<String, Value>),
}

impl SortSpec {
    /// Field/direction pairs in declaration order; unknown directions sort ascending
    pub fn pairs(&self) -> Vec<(String, i32)> {
        let entries: Vec<(&String, &Value)> = match self {
            SortSpec::Pairs(pairs) => pairs.iter().map(|(k, v)| (k, v)).collect(),
            SortSpec::Map(map) => map.iter().collect(),
        };
        entries
            .into_iter()
            .map(|(field, dir)| (field.clone(), sort_direction(dir)))
            .collect()
    }
}

pub fn sort_direction(value: &Value) -> i32 {
    match value {
        Value::Number(n) if n.as_i64().map(|v| v < 0).unwrap_or(false) => -1,
        Value::String(s) => {
            let lowered = s.trim().to_lowercase();
            if lowered == "-1" || lowered.starts_with("desc") {
                -1
            } else {
                1
            }
        }
        _ => 1,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MongoPlan {
    pub collection: String,
    #[serde(default = "default_mongo_operation")]
    pub operation: String,
    #[serde(default)]
    pub filter: Option<Value>,
    #[serde(default)]
    pub projection: Option<Value>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub pipeline: Option<Vec<Value>>,
}

fn default_mongo_operation() -> String {
    "find".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirestorePlan {
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub filters: Option<Vec<(String, String, Value)>>,
    /// `["field", "asc" | "desc"]`; direction defaults to ascending
    #[serde(default)]
    pub order_by: Option<Vec<String>>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub select: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisPlan {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl RedisPlan {
    pub fn command_upper(&self) -> String {
        self.command.trim().to_uppercase()
    }

    /// Arguments as the strings Redis expects on the wire
    pub fn string_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| match arg {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .collect()
    }
}

/// Tabular result of executing a generated query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    #[serde(default)]
    pub truncated: bool,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            truncated: false,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Align schemaless documents into rows over the sorted union of their keys
    pub fn from_documents(documents: Vec<Map<String, Value>>) -> Self {
        if documents.is_empty() {
            return Self::empty();
        }

        let columns: Vec<String> = documents
            .iter()
            .flat_map(|doc| doc.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let rows = documents
            .into_iter()
            .map(|mut doc| {
                columns
                    .iter()
                    .map(|c| doc.remove(c).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self::new(columns, rows)
    }

    /// Rows as column-keyed objects, used for summaries
    pub fn records(&self, limit: usize) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .take(limit)
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<Map<String, Value>>()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_plan_is_pretty_json() {
        let query = GeneratedQuery::Plan(json!({"command": "GET", "args": ["k"]}));
        assert_eq!(
            query.to_string(),
            "{\n  \"command\": \"GET\",\n  \"args\": [\n    \"k\"\n  ]\n}"
        );
        let sql = GeneratedQuery::Sql("SELECT 1".into());
        assert_eq!(sql.to_string(), "SELECT 1");
    }

    #[test]
    fn test_mongo_plan_defaults_to_find() {
        let plan: MongoPlan = serde_json::from_value(json!({
            "collection": "students",
            "sort": [["marks", -1]],
            "limit": 5
        }))
        .unwrap();
        assert_eq!(plan.operation, "find");
        assert_eq!(
            plan.sort.unwrap().pairs(),
            vec![("marks".to_string(), -1)]
        );
    }

    #[test]
    fn test_sort_map_keeps_order() {
        let spec: SortSpec =
            serde_json::from_value(json!({"year": "desc", "name": 1})).unwrap();
        assert_eq!(
            spec.pairs(),
            vec![("year".to_string(), -1), ("name".to_string(), 1)]
        );
    }

    #[test]
    fn test_from_documents_sorted_union() {
        let docs = vec![
            json!({"name": "a", "marks": 90}).as_object().unwrap().clone(),
            json!({"name": "b", "city": "x"}).as_object().unwrap().clone(),
        ];
        let result = ResultSet::from_documents(docs);
        assert_eq!(result.columns, vec!["city", "marks", "name"]);
        assert_eq!(result.rows[0], vec![Value::Null, json!(90), json!("a")]);
        assert_eq!(result.rows[1], vec![json!("x"), Value::Null, json!("b")]);
    }

    #[test]
    fn test_from_documents_empty() {
        let result = ResultSet::from_documents(vec![]);
        assert!(result.columns.is_empty());
        assert!(result.rows.is_empty());
    }

    #[test]
    fn test_redis_args_are_stringified() {
        let plan: RedisPlan =
            serde_json::from_value(json!({"command": "scan", "args": [0, "MATCH", "user:*"]}))
                .unwrap();
        assert_eq!(plan.command_upper(), "SCAN");
        assert_eq!(plan.string_args(), vec!["0", "MATCH", "user:*"]);
    }

    #[test]
    fn test_firestore_plan_shape() {
        let plan: FirestorePlan = serde_json::from_value(json!({
            "collection": "students",
            "filters": [["marks", ">", 90]],
            "order_by": ["marks", "desc"],
            "limit": 5,
            "select": null
        }))
        .unwrap();
        assert_eq!(plan.filters.unwrap()[0].1, ">");
        assert_eq!(plan.order_by.unwrap(), vec!["marks", "desc"]);
    }
}
