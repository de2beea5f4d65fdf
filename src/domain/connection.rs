use crate::domain::db_kind::DbKind;
use serde::{Deserialize, Deserializer, Serialize};

/// Connection parameters as posted by the client.
///
/// Every field is optional because each backend reads a different subset.
/// `password` and `access_token` accept secret references
/// (`env:NAME`, `keychain:NAME`, `plain:value`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default, deserialize_with = "deserialize_port")]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub ssl_mode: Option<String>,
    /// Elasticsearch index
    #[serde(default)]
    pub index: Option<String>,
    /// Elasticsearch scheme, defaults to http
    #[serde(default)]
    pub scheme: Option<String>,
    /// Firestore project
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
    /// Overrides the REST endpoint (Firestore emulator, proxied Elasticsearch)
    #[serde(default)]
    pub base_url: Option<String>,
    /// Firestore service account, either inline JSON or a path
    #[serde(default, skip_serializing)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub label: Option<String>,
}

impl ConnectionConfig {
    pub fn port_or_default(&self, kind: DbKind) -> u16 {
        self.port.or_else(|| kind.default_port()).unwrap_or_default()
    }

    pub fn host_or_localhost(&self) -> &str {
        self.host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or("localhost")
    }

    /// Human-readable label for logs and listings, never containing secrets
    pub fn display_label(&self, kind: DbKind) -> String {
        if let Some(label) = self.label.as_deref().filter(|l| !l.trim().is_empty()) {
            return label.to_string();
        }
        match kind {
            DbKind::Sqlite => format!(
                "sqlite:{}",
                self.database.as_deref().unwrap_or(":memory:")
            ),
            DbKind::Firebase => format!(
                "firestore:{}",
                self.project_id.as_deref().unwrap_or("unknown")
            ),
            _ => format!(
                "{}://{}:{}/{}",
                kind,
                self.host_or_localhost(),
                self.port_or_default(kind),
                self.database
                    .as_deref()
                    .or(self.index.as_deref())
                    .unwrap_or("")
            ),
        }
    }
}

fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortValue {
        Number(u16),
        Text(String),
    }

    match Option::<PortValue>::deserialize(deserializer)? {
        None => Ok(None),
        Some(PortValue::Number(n)) => Ok(Some(n)),
        Some(PortValue::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(PortValue::Text(s)) => s
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", s))),
    }
}

/// Public description of a registered connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub db_type: DbKind,
    pub label: String,
    pub host: Option<String>,
    pub database: Option<String>,
    pub connected_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConnectionResult {
    pub success: bool,
    pub message: String,
}
