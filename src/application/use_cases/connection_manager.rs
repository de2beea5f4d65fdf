//! Connection Manager
//!
//! Keeps every registered database connection for the lifetime of the process.
//! This module handles:
//! - Connection registration with uuid identifiers and an "active" pointer
//! - Health checks (connect, ping, close) that never register anything
//! - Per-connection schema caching with a TTL
//!
//! Security considerations:
//! - `ConnectionInfo` and log lines carry labels only, never credentials
//! - Pools are opened read-only unless the guard configuration allows writes

use crate::domain::connection::{ConnectionConfig, ConnectionInfo, TestConnectionResult};
use crate::domain::db_kind::DbKind;
use crate::domain::error::{AppError, Result};
use crate::domain::schema::{SchemaDoc, SchemaEntry};
use crate::infrastructure::config::PoolSettings;
use crate::infrastructure::db::{open_backend, SharedBackend};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// A registered connection and its live backend
pub struct ManagedConnection {
    pub info: ConnectionInfo,
    pub backend: SharedBackend,
}

struct CachedSchema {
    doc: SchemaDoc,
    fetched_at: Instant,
}

pub struct ConnectionManager {
    connections: Arc<RwLock<HashMap<String, Arc<ManagedConnection>>>>,
    active: RwLock<Option<String>>,
    schema_cache: RwLock<HashMap<String, CachedSchema>>,
    settings: PoolSettings,
    read_only: bool,
}

impl ConnectionManager {
    pub fn new(settings: PoolSettings, read_only: bool) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            active: RwLock::new(None),
            schema_cache: RwLock::new(HashMap::new()),
            settings,
            read_only,
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    async fn open(&self, kind: DbKind, config: &ConnectionConfig) -> Result<SharedBackend> {
        if kind == DbKind::Custom {
            return Err(AppError::Unsupported(
                "Custom DB not implemented yet".to_string(),
            ));
        }

        let secs = self.settings.connect_timeout_secs;
        let backend = tokio::time::timeout(
            Duration::from_secs(secs.max(1)),
            open_backend(kind, config, &self.settings, self.read_only),
        )
        .await
        .map_err(|_| {
            AppError::DatabaseError(format!(
                "Failed to connect to {}: timed out after {} seconds",
                kind, secs
            ))
        })??;

        let ping = tokio::time::timeout(Duration::from_secs(secs.max(1)), backend.ping()).await;
        match ping {
            Ok(Ok(())) => Ok(backend),
            Ok(Err(e)) => {
                backend.close().await;
                Err(e)
            }
            Err(_) => {
                backend.close().await;
                Err(AppError::DatabaseError(format!(
                    "Failed to connect to {}: health check timed out after {} seconds",
                    kind, secs
                )))
            }
        }
    }

    /// Connect, register under a new id and make it the active connection
    pub async fn connect(&self, kind: DbKind, config: &ConnectionConfig) -> Result<ConnectionInfo> {
        let backend = self.open(kind, config).await?;
        let info = ConnectionInfo {
            id: uuid::Uuid::new_v4().to_string(),
            db_type: kind,
            label: config.display_label(kind),
            host: config.host.clone(),
            database: config.database.clone().or_else(|| config.index.clone()),
            connected_at: chrono::Utc::now(),
        };

        Ok(self.register(info, backend).await)
    }

    async fn register(&self, info: ConnectionInfo, backend: SharedBackend) -> ConnectionInfo {
        let id = info.id.clone();
        {
            let mut connections = self.connections.write().await;
            connections.insert(
                id.clone(),
                Arc::new(ManagedConnection {
                    info: info.clone(),
                    backend,
                }),
            );
        }
        *self.active.write().await = Some(id.clone());

        info!(
            "Registered {} connection '{}' as {} (active)",
            info.db_type, info.label, id
        );
        info
    }

    /// Register a backend built elsewhere
    #[cfg(test)]
    pub(crate) async fn attach(&self, label: &str, backend: SharedBackend) -> ConnectionInfo {
        let info = ConnectionInfo {
            id: uuid::Uuid::new_v4().to_string(),
            db_type: backend.kind(),
            label: label.to_string(),
            host: None,
            database: Some(label.to_string()),
            connected_at: chrono::Utc::now(),
        };
        self.register(info, backend).await
    }

    /// Test connection settings without registering anything
    pub async fn test_connection(&self, kind: DbKind, config: &ConnectionConfig) -> TestConnectionResult {
        match self.open(kind, config).await {
            Ok(backend) => {
                backend.close().await;
                TestConnectionResult {
                    success: true,
                    message: format!("Successfully connected to {}", config.display_label(kind)),
                }
            }
            Err(e) => TestConnectionResult {
                success: false,
                message: e.to_string(),
            },
        }
    }

    /// The requested connection, or the active one when no id is given
    pub async fn resolve(&self, id: Option<&str>) -> Result<Arc<ManagedConnection>> {
        let id = match id.filter(|i| !i.trim().is_empty()) {
            Some(id) => id.to_string(),
            None => self.active.read().await.clone().ok_or_else(|| {
                AppError::ValidationError("No active database connection".to_string())
            })?,
        };

        let connections = self.connections.read().await;
        connections
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Connection '{}'", id)))
    }

    pub async fn active_id(&self) -> Option<String> {
        self.active.read().await.clone()
    }

    /// All registered connections, oldest first
    pub async fn list(&self) -> Vec<ConnectionInfo> {
        let connections = self.connections.read().await;
        let mut infos: Vec<ConnectionInfo> = connections.values().map(|c| c.info.clone()).collect();
        infos.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        infos
    }

    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn disconnect(&self, id: &str) -> Result<()> {
        let removed = self.connections.write().await.remove(id);
        let Some(connection) = removed else {
            return Err(AppError::NotFound(format!("Connection '{}'", id)));
        };

        {
            let mut active = self.active.write().await;
            if active.as_deref() == Some(id) {
                *active = None;
            }
        }
        self.schema_cache.write().await.remove(id);

        connection.backend.close().await;
        info!("Closed {} connection '{}'", connection.info.db_type, connection.info.label);
        Ok(())
    }

    /// Close every backend
    pub async fn close_all(&self) {
        let drained: Vec<Arc<ManagedConnection>> = {
            let mut connections = self.connections.write().await;
            connections.drain().map(|(_, c)| c).collect()
        };
        *self.active.write().await = None;
        self.schema_cache.write().await.clear();

        for connection in drained {
            info!("Closing connection {}", connection.info.id);
            connection.backend.close().await;
        }
    }

    /// Schema documentation, served from cache while fresh
    pub async fn schema_doc(&self, connection: &ManagedConnection, refresh: bool) -> Result<SchemaDoc> {
        let id = &connection.info.id;
        let ttl = Duration::from_secs(self.settings.schema_cache_ttl_secs);

        if !refresh && !ttl.is_zero() {
            let cache = self.schema_cache.read().await;
            if let Some(cached) = cache.get(id) {
                if cached.fetched_at.elapsed() < ttl {
                    return Ok(cached.doc.clone());
                }
            }
        }

        let mut doc = connection.backend.describe().await.map_err(|e| {
            warn!("Schema introspection failed for {}: {}", id, e);
            e
        })?;
        if doc.database.is_empty() {
            doc.database = connection.info.label.clone();
        }

        if !ttl.is_zero() {
            self.schema_cache.write().await.insert(
                id.clone(),
                CachedSchema {
                    doc: doc.clone(),
                    fetched_at: Instant::now(),
                },
            );
        }
        Ok(doc)
    }

    /// Compact schema used in translation prompts
    pub async fn schema_snapshot(
        &self,
        connection: &ManagedConnection,
        refresh: bool,
    ) -> Result<Vec<SchemaEntry>> {
        Ok(self.schema_doc(connection, refresh).await?.snapshot())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::query::{GeneratedQuery, ResultSet};
    use crate::infrastructure::db::sql::tests::seeded_backend;
    use crate::infrastructure::db::DatabaseBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that counts describe calls
    pub(crate) struct CountingBackend {
        pub describes: AtomicUsize,
    }

    #[async_trait]
    impl DatabaseBackend for CountingBackend {
        fn kind(&self) -> DbKind {
            DbKind::Redis
        }
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        async fn describe(&self) -> Result<SchemaDoc> {
            self.describes.fetch_add(1, Ordering::SeqCst);
            Ok(SchemaDoc::new("db0", DbKind::Redis))
        }
        async fn execute(&self, _query: &GeneratedQuery, _max_rows: usize) -> Result<ResultSet> {
            Ok(ResultSet::empty())
        }
        async fn close(&self) {}
    }

    fn manager() -> ConnectionManager {
        ConnectionManager::new(PoolSettings::default(), true)
    }

    #[tokio::test]
    async fn test_resolve_without_connections() {
        let manager = manager();
        match manager.resolve(None).await {
            Err(AppError::ValidationError(msg)) => assert_eq!(msg, "No active database connection"),
            _ => panic!("expected ValidationError"),
        }
        assert!(matches!(
            manager.resolve(Some("missing")).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_last_attached_is_active() {
        let manager = manager();
        let first = manager.attach("first", Arc::new(seeded_backend().await)).await;
        let second = manager.attach("second", Arc::new(seeded_backend().await)).await;

        assert_eq!(manager.active_id().await, Some(second.id.clone()));
        assert_eq!(manager.resolve(None).await.unwrap().info.id, second.id);
        assert_eq!(manager.resolve(Some(&first.id)).await.unwrap().info.label, "first");

        let listed: Vec<String> = manager.list().await.into_iter().map(|c| c.id).collect();
        assert_eq!(listed, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_disconnect_active_clears_pointer() {
        let manager = manager();
        let info = manager.attach("shop", Arc::new(seeded_backend().await)).await;
        manager.disconnect(&info.id).await.unwrap();

        assert_eq!(manager.active_id().await, None);
        assert_eq!(manager.count().await, 0);
        assert!(matches!(
            manager.disconnect(&info.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_custom_kind_rejected() {
        let manager = manager();
        let result = manager.connect(DbKind::Custom, &ConnectionConfig::default()).await;
        assert!(matches!(result, Err(AppError::Unsupported(_))));

        let tested = manager
            .test_connection(DbKind::Custom, &ConnectionConfig::default())
            .await;
        assert!(!tested.success);
        assert_eq!(tested.message, "Custom DB not implemented yet");
    }

    #[tokio::test]
    async fn test_sqlite_memory_connect_and_test() {
        let manager = manager();
        let mut config = ConnectionConfig::default();
        config.database = Some(":memory:".to_string());

        let tested = manager.test_connection(DbKind::Sqlite, &config).await;
        assert!(tested.success, "{}", tested.message);
        assert_eq!(manager.count().await, 0);

        let info = manager.connect(DbKind::Sqlite, &config).await.unwrap();
        assert_eq!(info.db_type, DbKind::Sqlite);
        assert_eq!(info.label, "sqlite::memory:");
        manager.close_all().await;
        assert_eq!(manager.count().await, 0);
    }

    #[tokio::test]
    async fn test_schema_is_cached_until_refresh() {
        let manager = manager();
        let backend = Arc::new(CountingBackend {
            describes: AtomicUsize::new(0),
        });
        manager.attach("cache", backend.clone()).await;
        let connection = manager.resolve(None).await.unwrap();

        manager.schema_doc(&connection, false).await.unwrap();
        manager.schema_doc(&connection, false).await.unwrap();
        assert_eq!(backend.describes.load(Ordering::SeqCst), 1);

        manager.schema_doc(&connection, true).await.unwrap();
        assert_eq!(backend.describes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_cache() {
        let settings = PoolSettings {
            schema_cache_ttl_secs: 0,
            ..PoolSettings::default()
        };
        let manager = ConnectionManager::new(settings, true);
        let backend = Arc::new(CountingBackend {
            describes: AtomicUsize::new(0),
        });
        manager.attach("nocache", backend.clone()).await;
        let connection = manager.resolve(None).await.unwrap();

        manager.schema_doc(&connection, false).await.unwrap();
        manager.schema_doc(&connection, false).await.unwrap();
        assert_eq!(backend.describes.load(Ordering::SeqCst), 2);
    }
}
