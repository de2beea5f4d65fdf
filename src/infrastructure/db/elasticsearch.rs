use super::{connect_error, with_timeout, DatabaseBackend};
use crate::domain::connection::ConnectionConfig;
use crate::domain::db_kind::DbKind;
use crate::domain::error::{AppError, Result};
use crate::domain::query::{GeneratedQuery, ResultSet};
use crate::domain::schema::{ColumnDoc, EntityDoc, EntityKind, SchemaDoc};
use crate::infrastructure::config::PoolSettings;
use crate::infrastructure::security::resolve_optional_secret;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::info;

/// Elasticsearch over its REST API
pub struct ElasticsearchBackend {
    client: reqwest::Client,
    base_url: String,
    index: Option<String>,
    credentials: Option<(String, Option<String>)>,
    query_timeout_secs: u64,
}

impl ElasticsearchBackend {
    pub fn connect(config: &ConnectionConfig, settings: &PoolSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .timeout(Duration::from_secs(settings.query_timeout_secs.max(1)))
            .build()
            .map_err(|e| connect_error(DbKind::Elasticsearch, e))?;

        let credentials = match config.user.as_deref().filter(|u| !u.is_empty()) {
            Some(user) => Some((
                user.to_string(),
                resolve_optional_secret(config.password.as_deref())?,
            )),
            None => None,
        };

        info!(
            "Created Elasticsearch client for '{}'",
            config.display_label(DbKind::Elasticsearch)
        );

        Ok(Self {
            client,
            base_url: Self::base_url(config),
            index: config.index.clone().filter(|i| !i.trim().is_empty()),
            credentials,
            query_timeout_secs: settings.query_timeout_secs,
        })
    }

    fn base_url(config: &ConnectionConfig) -> String {
        let scheme = config
            .scheme
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("http");
        format!(
            "{}://{}:{}",
            scheme,
            config.host_or_localhost(),
            config.port_or_default(DbKind::Elasticsearch)
        )
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let request = self.client.request(method, url);
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, password.as_ref()),
            None => request,
        }
    }

    async fn send_json(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Elasticsearch request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::DatabaseError(format!(
                "Elasticsearch error ({}): {}",
                status, text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Invalid Elasticsearch response: {}", e)))
    }

    fn required_index(&self) -> Result<&str> {
        self.index.as_deref().ok_or_else(|| {
            AppError::ValidationError("Elasticsearch index is required".to_string())
        })
    }
}

#[async_trait]
impl DatabaseBackend for ElasticsearchBackend {
    fn kind(&self) -> DbKind {
        DbKind::Elasticsearch
    }

    async fn ping(&self) -> Result<()> {
        self.send_json(self.request(reqwest::Method::GET, "/"))
            .await
            .map(|_| ())
            .map_err(|e| connect_error(DbKind::Elasticsearch, e))
    }

    async fn describe(&self) -> Result<SchemaDoc> {
        let database = self.index.clone().unwrap_or_default();
        let mut doc = SchemaDoc::new(&database, DbKind::Elasticsearch);
        let Some(index) = self.index.as_deref() else {
            doc.notes
                .push("No index configured; set `index` on the connection".to_string());
            return Ok(doc);
        };

        let mapping = with_timeout(
            self.query_timeout_secs,
            "Schema introspection",
            self.send_json(self.request(reqwest::Method::GET, &format!("{}/_mapping", index))),
        )
        .await?;

        doc.entities = mapping_entities(&mapping);
        Ok(doc)
    }

    async fn execute(&self, query: &GeneratedQuery, max_rows: usize) -> Result<ResultSet> {
        let index = self.required_index()?;
        let mut body = query.as_plan().cloned().ok_or_else(|| {
            AppError::ValidationError("Expected a JSON search body for elasticsearch".to_string())
        })?;
        cap_size(&mut body, max_rows);

        let response = with_timeout(
            self.query_timeout_secs,
            "Query",
            self.send_json(
                self.request(reqwest::Method::POST, &format!("{}/_search", index))
                    .json(&body),
            ),
        )
        .await?;

        Ok(hits_to_result(&response, max_rows))
    }

    async fn close(&self) {}
}

/// Make sure at most `max_rows + 1` hits come back so truncation can be detected
fn cap_size(body: &mut Value, max_rows: usize) {
    if let Value::Object(map) = body {
        let requested = map.get("size").and_then(Value::as_u64);
        if requested.map(|s| s as usize > max_rows).unwrap_or(false) {
            map.insert("size".to_string(), Value::from(max_rows + 1));
        }
    }
}

fn hits_to_result(response: &Value, max_rows: usize) -> ResultSet {
    let hits = response["hits"]["hits"].as_array().cloned().unwrap_or_default();
    if hits.is_empty() {
        return ResultSet::empty();
    }

    let truncated = hits.len() > max_rows;
    let documents: Vec<Map<String, Value>> = hits
        .into_iter()
        .take(max_rows)
        .map(|hit| match hit.get("_source") {
            Some(Value::Object(source)) => source.clone(),
            _ => Map::new(),
        })
        .collect();

    let mut result = ResultSet::from_documents(documents);
    result.truncated = truncated;
    result
}

/// One entity per index in a `_mapping` response, with top-level properties as columns
fn mapping_entities(mapping: &Value) -> Vec<EntityDoc> {
    let Some(indices) = mapping.as_object() else {
        return Vec::new();
    };

    let mut names: Vec<&String> = indices.keys().collect();
    names.sort();

    names
        .into_iter()
        .map(|name| {
            let mut entity = EntityDoc::new(name.clone(), EntityKind::Index);
            if let Some(properties) = indices[name]["mappings"]["properties"].as_object() {
                entity.columns = properties
                    .iter()
                    .map(|(field, spec)| {
                        let data_type = spec["type"].as_str().unwrap_or("object");
                        ColumnDoc::typed(field.clone(), data_type)
                    })
                    .collect();
            }
            entity
        })
        .collect()
}
