use super::{http_client, send_json, LLMClient};
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Client for OpenAI-compatible chat completion APIs (OpenAI, OpenRouter, local servers)
pub struct OpenAIClient {
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }

    fn endpoint(config: &LLMConfig, path: &str) -> String {
        format!("{}/{}", config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder, config: &LLMConfig) -> reqwest::RequestBuilder {
        // local servers usually run without a key
        match config.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn request_body(config: &LLMConfig, system: &str, user: &str) -> Value {
        json!({
            "model": config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
        })
    }

    fn completion_text(reply: &Value) -> Result<String> {
        reply["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AppError::LLMError("Invalid response format".to_string()))
    }

    fn model_ids(reply: &Value) -> Result<Vec<String>> {
        let data = reply["data"].as_array().ok_or_else(|| {
            AppError::LLMError("Invalid response format: missing data array".to_string())
        })?;
        Ok(data
            .iter()
            .filter_map(|m| m["id"].as_str())
            .map(str::to_string)
            .collect())
    }
}

impl Default for OpenAIClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn generate(&self, config: &LLMConfig, system: &str, user: &str) -> Result<String> {
        let request = self
            .client
            .post(Self::endpoint(config, "chat/completions"))
            .json(&Self::request_body(config, system, user));
        let reply: Value = send_json(self.authorized(request, config)).await?;
        Self::completion_text(&reply)
    }

    async fn list_models(&self, config: &LLMConfig) -> Result<Vec<String>> {
        let request = self.client.get(Self::endpoint(config, "models"));
        let reply: Value = send_json(self.authorized(request, config)).await?;
        Self::model_ids(&reply)
    }
}
