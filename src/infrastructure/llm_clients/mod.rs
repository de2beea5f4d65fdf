pub mod gemini;
pub mod openai;

use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::{LLMConfig, LLMProvider};
use async_trait::async_trait;
use gemini::GeminiClient;
use openai::OpenAIClient;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait LLMClient {
    async fn generate(&self, config: &LLMConfig, system: &str, user: &str) -> Result<String>;
    async fn list_models(&self, config: &LLMConfig) -> Result<Vec<String>>;
}

pub type SharedLLMClient = Arc<dyn LLMClient + Send + Sync>;

/// Run a generation bounded by `config.request_timeout_secs`
pub async fn generate_with_timeout(
    client: &SharedLLMClient,
    config: &LLMConfig,
    system: &str,
    user: &str,
) -> Result<String> {
    let secs = config.request_timeout_secs.max(1);
    tokio::time::timeout(
        Duration::from_secs(secs),
        client.generate(config, system, user),
    )
    .await
    .map_err(|_| AppError::LLMError(format!("Model did not answer within {} seconds", secs)))?
}

/// Send a provider request and decode its JSON body, turning HTTP failures into `LLMError`
pub(crate) async fn send_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|e| AppError::LLMError(format!("Request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(AppError::LLMError(format!("API error ({}): {}", status, text)));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::LLMError(format!("Failed to parse JSON: {}", e)))
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Dispatches to the Gemini API for Google and to the OpenAI-compatible API otherwise
pub struct RouterClient {
    openai: OpenAIClient,
    gemini: GeminiClient,
}

impl RouterClient {
    pub fn new() -> Self {
        Self {
            openai: OpenAIClient::new(),
            gemini: GeminiClient::new(),
        }
    }
}

impl Default for RouterClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMClient for RouterClient {
    async fn generate(&self, config: &LLMConfig, system: &str, user: &str) -> Result<String> {
        match config.provider {
            LLMProvider::Google => self.gemini.generate(config, system, user).await,
            _ => self.openai.generate(config, system, user).await,
        }
    }

    async fn list_models(&self, config: &LLMConfig) -> Result<Vec<String>> {
        match config.provider {
            LLMProvider::Google => self.gemini.list_models(config).await,
            _ => self.openai.list_models(config).await,
        }
    }
}
