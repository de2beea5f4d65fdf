use crate::application::use_cases::connection_manager::ConnectionManager;
use crate::application::{AskUseCase, SchemaDocsUseCase};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::llm_clients::SharedLLMClient;
use crate::interfaces::http::logs::LogBuffer;
use std::sync::Arc;

pub struct AppState {
    pub config: AppConfig,
    pub connections: Arc<ConnectionManager>,
    pub ask_use_case: AskUseCase,
    pub schema_docs_use_case: SchemaDocsUseCase,
    pub llm_client: SharedLLMClient,
    pub logs: Arc<LogBuffer>,
}

impl AppState {
    pub fn new(config: AppConfig, llm_client: SharedLLMClient) -> Self {
        let read_only = !config.guard.allow_writes;
        let connections = Arc::new(ConnectionManager::new(config.pool.clone(), read_only));

        Self {
            ask_use_case: AskUseCase::new(
                connections.clone(),
                llm_client.clone(),
                config.llm.clone(),
                config.guard.clone(),
            ),
            schema_docs_use_case: SchemaDocsUseCase::new(connections.clone()),
            connections,
            llm_client,
            logs: Arc::new(LogBuffer::new()),
            config,
        }
    }
}
