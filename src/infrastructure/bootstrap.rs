use std::sync::Arc;

use tracing::{info, warn};

use crate::infrastructure::config::AppConfig;
use crate::infrastructure::llm_clients::{RouterClient, SharedLLMClient};
use crate::interfaces::http::state::AppState;

/// Wire configuration, the LLM client and the use cases into shared state
pub fn build_state(config: AppConfig) -> Arc<AppState> {
    log_effective_config(&config);
    let llm_client: SharedLLMClient = Arc::new(RouterClient::new());
    Arc::new(AppState::new(config, llm_client))
}

fn log_effective_config(config: &AppConfig) {
    info!(
        provider = ?config.llm.provider,
        model = %config.llm.model,
        base_url = %config.llm.base_url,
        "LLM configured"
    );
    if config.llm.api_key.is_none() {
        warn!("No LLM API key configured; questions will fail until one is set");
    }

    info!(
        max_rows = config.pool.max_rows,
        query_timeout_secs = config.pool.query_timeout_secs,
        schema_cache_ttl_secs = config.pool.schema_cache_ttl_secs,
        "Connection limits"
    );

    if config.guard.allow_writes {
        warn!("Write statements are enabled for Owner callers");
    } else {
        info!("Connections are opened read-only");
    }

    if config.auth.enabled && config.auth.users.is_empty() {
        warn!("Authentication is enabled but no users are configured; every request will be rejected");
    } else if !config.auth.enabled {
        warn!("Authentication is disabled; every caller acts as Owner");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_starts_without_connections() {
        let state = build_state(AppConfig::default());
        assert_eq!(state.connections.count().await, 0);
        assert!(state.logs.snapshot().is_empty());
        assert_eq!(state.connections.settings().max_rows, 1000);
    }
}
