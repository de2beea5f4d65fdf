//! Database backends.
//!
//! Each supported store sits behind [`DatabaseBackend`]. SQL engines share one
//! sqlx-based implementation; document, key-value and search stores each get
//! their own client.

pub mod elasticsearch;
pub mod firestore;
pub mod mongo;
pub mod redis_store;
pub mod sql;

use crate::domain::connection::ConnectionConfig;
use crate::domain::db_kind::DbKind;
use crate::domain::error::{AppError, Result};
use crate::domain::query::{GeneratedQuery, ResultSet};
use crate::domain::schema::SchemaDoc;
use crate::infrastructure::config::PoolSettings;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    fn kind(&self) -> DbKind;

    /// Cheap round trip proving the store is reachable
    async fn ping(&self) -> Result<()>;

    /// Full schema documentation; the compact LLM snapshot is derived from it
    async fn describe(&self) -> Result<SchemaDoc>;

    /// Run a guarded query, returning at most `max_rows` rows
    async fn execute(&self, query: &GeneratedQuery, max_rows: usize) -> Result<ResultSet>;

    async fn close(&self);
}

pub type SharedBackend = Arc<dyn DatabaseBackend>;

/// Build and connect the backend for `kind`
pub async fn open_backend(
    kind: DbKind,
    config: &ConnectionConfig,
    pool: &PoolSettings,
    read_only: bool,
) -> Result<SharedBackend> {
    let backend: SharedBackend = match kind {
        DbKind::MySql | DbKind::Postgres | DbKind::Sqlite => {
            Arc::new(sql::SqlBackend::connect(kind, config, pool, read_only).await?)
        }
        DbKind::MongoDb => Arc::new(mongo::MongoBackend::connect(config, pool).await?),
        DbKind::Redis => Arc::new(redis_store::RedisBackend::connect(config, pool).await?),
        DbKind::Elasticsearch => {
            Arc::new(elasticsearch::ElasticsearchBackend::connect(config, pool)?)
        }
        DbKind::Firebase => Arc::new(firestore::FirestoreBackend::connect(config, pool)?),
        DbKind::Custom => {
            return Err(AppError::Unsupported(
                "Custom DB not implemented yet".to_string(),
            ))
        }
    };
    Ok(backend)
}

/// Standard message for a failed connection attempt
pub(crate) fn connect_error(kind: DbKind, cause: impl std::fmt::Display) -> AppError {
    AppError::DatabaseError(format!("Failed to connect to {}: {}", kind, cause))
}

/// Decode the JSON plan a non-SQL store expects
pub(crate) fn plan_for<T: DeserializeOwned>(kind: DbKind, query: &GeneratedQuery) -> Result<T> {
    let plan = query.as_plan().ok_or_else(|| {
        AppError::ValidationError(format!("Expected a JSON plan for {}", kind))
    })?;
    serde_json::from_value(plan.clone())
        .map_err(|e| AppError::ValidationError(format!("Invalid {} plan: {}", kind, e)))
}

/// Bound a store call by `secs`, reporting `what` on expiry
pub(crate) async fn with_timeout<T, F>(secs: u64, what: &str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(Duration::from_secs(secs.max(1)), future)
        .await
        .map_err(|_| {
            AppError::DatabaseError(format!("{} timed out after {} seconds", what, secs))
        })?
}
