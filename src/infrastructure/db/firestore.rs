//! Firestore through its REST API.
//!
//! Plans are translated into a `structuredQuery` for `documents:runQuery`.
//! Authentication is a caller-supplied OAuth access token; the emulator
//! (reached through `base_url`) needs none.

use super::{connect_error, plan_for, with_timeout, DatabaseBackend};
use crate::domain::connection::ConnectionConfig;
use crate::domain::db_kind::DbKind;
use crate::domain::error::{AppError, Result};
use crate::domain::query::{sort_direction, FirestorePlan, GeneratedQuery, ResultSet};
use crate::domain::schema::{ColumnDoc, EntityDoc, EntityKind, SchemaDoc};
use crate::infrastructure::config::PoolSettings;
use crate::infrastructure::security::resolve_optional_secret;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::info;

const FIRESTORE_ROOT: &str = "https://firestore.googleapis.com";

pub struct FirestoreBackend {
    client: reqwest::Client,
    documents_url: String,
    project_id: String,
    access_token: Option<String>,
    query_timeout_secs: u64,
}

impl FirestoreBackend {
    pub fn connect(config: &ConnectionConfig, settings: &PoolSettings) -> Result<Self> {
        let project_id = Self::project_id(config)?;
        let access_token = resolve_optional_secret(config.access_token.as_deref())?
            .filter(|t| !t.trim().is_empty());
        let emulator = config.base_url.as_deref().map(|u| !u.is_empty()).unwrap_or(false);
        if access_token.is_none() && !emulator {
            return Err(AppError::ValidationError(
                "Firestore access_token is required".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .timeout(Duration::from_secs(settings.query_timeout_secs.max(1)))
            .build()
            .map_err(|e| connect_error(DbKind::Firebase, e))?;

        info!("Created Firestore client for project '{}'", project_id);

        Ok(Self {
            client,
            documents_url: Self::documents_url(config.base_url.as_deref(), &project_id),
            project_id,
            access_token,
            query_timeout_secs: settings.query_timeout_secs,
        })
    }

    /// `project_id` from the connection, else from the service-account JSON (inline or a file path)
    fn project_id(config: &ConnectionConfig) -> Result<String> {
        if let Some(id) = config.project_id.as_deref().filter(|p| !p.trim().is_empty()) {
            return Ok(id.to_string());
        }

        let account = match &config.config {
            Some(Value::Object(map)) => Some(Value::Object(map.clone())),
            Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
                Ok(parsed) => Some(parsed),
                Err(_) => {
                    let contents = std::fs::read_to_string(text)?;
                    Some(serde_json::from_str(&contents).map_err(|e| {
                        AppError::ValidationError(format!("Invalid service account file: {}", e))
                    })?)
                }
            },
            _ => None,
        };

        account
            .as_ref()
            .and_then(|a| a["project_id"].as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::ValidationError("Firestore project_id is required".to_string()))
    }

    fn documents_url(base_url: Option<&str>, project_id: &str) -> String {
        let root = base_url
            .filter(|u| !u.is_empty())
            .unwrap_or(FIRESTORE_ROOT)
            .trim_end_matches('/');
        format!(
            "{}/v1/projects/{}/databases/(default)/documents",
            root, project_id
        )
    }

    async fn post(&self, suffix: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.documents_url, suffix);
        let mut request = self.client.post(url).json(body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Firestore request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::DatabaseError(format!(
                "Firestore error ({}): {}",
                status, text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Invalid Firestore response: {}", e)))
    }

    async fn list_collections(&self, page_size: Option<u32>) -> Result<Vec<String>> {
        let body = match page_size {
            Some(size) => json!({ "pageSize": size }),
            None => json!({}),
        };
        let response = self.post(":listCollectionIds", &body).await?;
        let mut ids: Vec<String> = response["collectionIds"]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }

    async fn run_query(&self, structured: Value) -> Result<Vec<Map<String, Value>>> {
        let response = self
            .post(":runQuery", &json!({ "structuredQuery": structured }))
            .await?;
        Ok(response
            .as_array()
            .map(|items| items.iter().filter_map(|item| decode_document(&item["document"])).collect())
            .unwrap_or_default())
    }

    async fn sample_collections(&self) -> Result<SchemaDoc> {
        let mut doc = SchemaDoc::new(&self.project_id, DbKind::Firebase);
        for collection in self.list_collections(None).await? {
            let mut entity = EntityDoc::new(collection.clone(), EntityKind::Collection);
            let sample = self
                .run_query(json!({ "from": [{ "collectionId": collection }], "limit": 1 }))
                .await?;
            if let Some(first) = sample.first() {
                entity.columns = first
                    .iter()
                    .map(|(field, value)| ColumnDoc::typed(field.clone(), json_type_name(value)))
                    .collect();
            }
            doc.entities.push(entity);
        }
        Ok(doc)
    }
}

#[async_trait]
impl DatabaseBackend for FirestoreBackend {
    fn kind(&self) -> DbKind {
        DbKind::Firebase
    }

    async fn ping(&self) -> Result<()> {
        self.list_collections(Some(1))
            .await
            .map(|_| ())
            .map_err(|e| connect_error(DbKind::Firebase, e))
    }

    async fn describe(&self) -> Result<SchemaDoc> {
        with_timeout(
            self.query_timeout_secs,
            "Schema introspection",
            self.sample_collections(),
        )
        .await
    }

    async fn execute(&self, query: &GeneratedQuery, max_rows: usize) -> Result<ResultSet> {
        let plan: FirestorePlan = plan_for(DbKind::Firebase, query)?;
        let plan_limit = plan.limit.filter(|l| *l > 0).map(|l| l as usize);
        let structured = structured_query(&plan, max_rows)?;

        let mut documents =
            with_timeout(self.query_timeout_secs, "Query", self.run_query(structured)).await?;

        let cap = plan_limit.map(|l| l.min(max_rows)).unwrap_or(max_rows);
        let truncated = documents.len() > cap && plan_limit.map(|l| l > max_rows).unwrap_or(true);
        documents.truncate(cap);

        let mut result = ResultSet::from_documents(documents);
        result.truncated = truncated;
        Ok(result)
    }

    async fn close(&self) {}
}

fn operator(op: &str) -> Option<&'static str> {
    Some(match op {
        "==" => "EQUAL",
        "!=" => "NOT_EQUAL",
        "<" => "LESS_THAN",
        "<=" => "LESS_THAN_OR_EQUAL",
        ">" => "GREATER_THAN",
        ">=" => "GREATER_THAN_OR_EQUAL",
        "in" => "IN",
        "not-in" => "NOT_IN",
        "array-contains" => "ARRAY_CONTAINS",
        "array-contains-any" => "ARRAY_CONTAINS_ANY",
        _ => return None,
    })
}

/// Translate a plan into a REST `structuredQuery`; the limit asks for one extra row to detect truncation
fn structured_query(plan: &FirestorePlan, max_rows: usize) -> Result<Value> {
    let mut query = Map::new();
    query.insert("from".into(), json!([{ "collectionId": plan.collection }]));

    let mut filters = Vec::new();
    for (field, op, value) in plan.filters.iter().flatten() {
        let op = operator(op).ok_or_else(|| {
            AppError::ValidationError(format!("Unsupported Firestore operator: {}", op))
        })?;
        filters.push(json!({
            "fieldFilter": {
                "field": { "fieldPath": field },
                "op": op,
                "value": encode_value(value),
            }
        }));
    }
    match filters.len() {
        0 => {}
        1 => {
            query.insert("where".into(), filters.remove(0));
        }
        _ => {
            query.insert(
                "where".into(),
                json!({ "compositeFilter": { "op": "AND", "filters": filters } }),
            );
        }
    }

    if let Some(order) = plan.order_by.as_ref().filter(|o| !o.is_empty()) {
        let direction = match order.get(1).map(|d| sort_direction(&Value::String(d.clone()))) {
            Some(-1) => "DESCENDING",
            _ => "ASCENDING",
        };
        query.insert(
            "orderBy".into(),
            json!([{ "field": { "fieldPath": order[0] }, "direction": direction }]),
        );
    }

    let limit = plan
        .limit
        .filter(|l| *l > 0)
        .map(|l| (l as usize).min(max_rows + 1))
        .unwrap_or(max_rows + 1);
    query.insert("limit".into(), json!(limit));

    if let Some(fields) = plan.select.as_ref().filter(|s| !s.is_empty()) {
        let paths: Vec<Value> = fields.iter().map(|f| json!({ "fieldPath": f })).collect();
        query.insert("select".into(), json!({ "fields": paths }));
    }

    Ok(Value::Object(query))
}

/// Plain JSON into a Firestore typed value
fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) if n.is_i64() || n.is_u64() => json!({ "integerValue": n.to_string() }),
        Value::Number(n) => json!({ "doubleValue": n.as_f64() }),
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            json!({ "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() } })
        }
        Value::Object(map) => {
            let fields: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), encode_value(v)))
                .collect();
            json!({ "mapValue": { "fields": fields } })
        }
    }
}

/// A Firestore typed value back into plain JSON
fn decode_value(value: &Value) -> Value {
    let Some((kind, inner)) = value.as_object().and_then(|m| m.iter().next()) else {
        return Value::Null;
    };
    match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => inner.clone(),
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| inner.clone()),
        "doubleValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner["values"]
                .as_array()
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(decode_fields(&inner["fields"])),
        // stringValue, timestampValue, referenceValue, bytesValue, geoPointValue
        _ => inner.clone(),
    }
}

fn decode_fields(fields: &Value) -> Map<String, Value> {
    fields
        .as_object()
        .map(|fields| {
            fields
                .iter()
                .map(|(k, v)| (k.clone(), decode_value(v)))
                .collect()
        })
        .unwrap_or_default()
}

/// A REST document as a flat record with its id
fn decode_document(document: &Value) -> Option<Map<String, Value>> {
    let name = document["name"].as_str()?;
    let mut record = decode_fields(&document["fields"]);
    let id = name.rsplit('/').next().unwrap_or(name);
    record.insert("id".to_string(), Value::String(id.to_string()));
    Some(record)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "double",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}
