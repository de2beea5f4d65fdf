//! Service configuration.
//!
//! Layers, later ones winning:
//! 1. built-in defaults
//! 2. the TOML file named by `QUERYBRIDGE_CONFIG` (default `querybridge.toml`, optional)
//! 3. `QUERYBRIDGE_*` environment variables, nested with `__`
//!    (e.g. `QUERYBRIDGE_SERVER__PORT=8080`)
//!
//! A `.env` file is loaded first so its values take part in step 3.

use crate::application::use_cases::query_guard::GuardRules;
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::{LLMConfig, LLMProvider};
use crate::domain::role::Role;
use crate::infrastructure::security::resolve_optional_secret;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "querybridge.toml";
pub const ENV_PREFIX: &str = "QUERYBRIDGE_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; empty means permissive
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default)]
    pub workers: Option<usize>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            cors_origins: Vec::new(),
            workers: None,
        }
    }
}

/// Pooling and execution limits shared by every backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Maximum connections in each pool
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub query_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    /// Rows returned per query before the result is marked truncated
    pub max_rows: usize,
    /// Schema snapshots are reused for this long; 0 disables caching
    pub schema_cache_ttl_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            connect_timeout_secs: 10,
            query_timeout_secs: 30,
            idle_timeout_secs: 300,
            max_rows: 1000,
            schema_cache_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiUser {
    pub name: String,
    pub role: Role,
    /// Hex SHA-256 of the bearer token
    pub token_sha256: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub users: Vec<ApiUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `tracing_subscriber` filter directive; `RUST_LOG` takes precedence
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub llm: LLMConfig,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub guard: GuardRules,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let path = std::env::var("QUERYBRIDGE_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let mut config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| AppError::ValidationError(format!("Invalid configuration: {}", e)))?;

        config.resolve_llm_key()?;
        Ok(config)
    }

    /// Fill `llm.api_key` from its reference or the provider's conventional env var
    fn resolve_llm_key(&mut self) -> Result<()> {
        if self.llm.api_key.as_deref().map(|k| !k.is_empty()).unwrap_or(false) {
            return Ok(());
        }

        if let Some(key) = resolve_optional_secret(self.llm.api_key_ref.as_deref())? {
            self.llm.api_key = Some(key);
            return Ok(());
        }

        let fallback_var = match self.llm.provider {
            LLMProvider::Google => "GEMINI_API_KEY",
            LLMProvider::Anthropic => "ANTHROPIC_API_KEY",
            LLMProvider::OpenRouter => "OPENROUTER_API_KEY",
            LLMProvider::OpenAI | LLMProvider::Local => "OPENAI_API_KEY",
        };
        self.llm.api_key = std::env::var(fallback_var).ok().filter(|k| !k.is_empty());
        Ok(())
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.server.host.clone(), self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_config(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("querybridge-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = AppConfig::load_from("/definitely/not/here.toml").unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.llm.model, "gemini-1.5-flash");
        assert_eq!(config.pool.max_rows, 1000);
        assert!(!config.guard.allow_writes);
        assert!(!config.auth.enabled);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let path = temp_config(
            r#"
[server]
host = "0.0.0.0"
port = 8088

[llm]
provider = "OpenAI"
base_url = "http://localhost:1234/v1"
model = "local-model"
api_key_ref = "plain:sk-test"

[pool]
max_rows = 50

[auth]
enabled = true

[[auth.users]]
name = "ana"
role = "Admin"
token_sha256 = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
"#,
        );

        let config = AppConfig::load_from(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.bind_address(), ("0.0.0.0".to_string(), 8088));
        assert_eq!(config.llm.provider, LLMProvider::OpenAI);
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.pool.max_rows, 50);
        // untouched keys keep their defaults
        assert_eq!(config.pool.query_timeout_secs, 30);
        assert!(config.auth.enabled);
        assert_eq!(config.auth.users[0].role, Role::Admin);
    }

    #[test]
    fn test_invalid_value_is_reported() {
        let path = temp_config("[server]\nport = \"not a port\"\n");
        let result = AppConfig::load_from(path.to_str().unwrap());
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(AppError::ValidationError(_))));
    }
}
