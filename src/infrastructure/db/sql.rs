//! Relational backend for PostgreSQL, MySQL and SQLite.
//!
//! One sqlx pool per connection. Results are streamed and capped so a runaway
//! query never buffers the whole table. Cells are decoded by trying the
//! likely Rust types in order and falling back to null.

use super::{connect_error, with_timeout, DatabaseBackend};
use crate::domain::connection::ConnectionConfig;
use crate::domain::db_kind::DbKind;
use crate::domain::error::{AppError, Result};
use crate::domain::query::{GeneratedQuery, ResultSet};
use crate::domain::schema::{ColumnDoc, EntityDoc, EntityKind, ForeignKeyDoc, IndexDoc, SchemaDoc};
use crate::infrastructure::config::PoolSettings;
use crate::infrastructure::security::resolve_optional_secret;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures_util::StreamExt;
use serde_json::{Number, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, Statement};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

enum SqlPool {
    Postgres(PgPool),
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

pub struct SqlBackend {
    kind: DbKind,
    pool: SqlPool,
    database: String,
    query_timeout_secs: u64,
}

/// Try each type in order; the first one the driver accepts wins
macro_rules! decode_cell {
    ($row:expr, $index:expr; $($ty:ty => $conv:expr),+ $(,)?) => {{
        $(
            if let Ok(v) = $row.try_get::<Option<$ty>, _>($index) {
                return v.map($conv).unwrap_or(Value::Null);
            }
        )+
        Value::Null
    }};
}

/// Stream at most `max_rows + 1` rows, recording column names on the way
macro_rules! fetch_capped {
    ($pool:expr, $sql:expr, $max_rows:expr, $decode:ident) => {{
        let mut columns: Vec<String> = Vec::new();
        let mut rows: Vec<Vec<Value>> = Vec::new();
        {
            let mut stream = sqlx::query($sql).fetch($pool).take($max_rows + 1);
            while let Some(row) = stream.next().await {
                let row = row.map_err(|e| {
                    AppError::DatabaseError(format!("Query execution failed: {}", e))
                })?;
                if columns.is_empty() {
                    columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                }
                rows.push((0..row.len()).map(|i| $decode(&row, i)).collect());
            }
        }
        if columns.is_empty() {
            // no rows: the prepared statement still knows the result shape
            if let Ok(statement) = $pool.prepare($sql).await {
                columns = statement
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect();
            }
        }
        (columns, rows)
    }};
}

impl SqlBackend {
    pub async fn connect(
        kind: DbKind,
        config: &ConnectionConfig,
        settings: &PoolSettings,
        read_only: bool,
    ) -> Result<Self> {
        let pool = match kind {
            DbKind::Postgres => SqlPool::Postgres(Self::create_pg_pool(config, settings, read_only).await?),
            DbKind::MySql => SqlPool::MySql(Self::create_mysql_pool(config, settings, read_only).await?),
            DbKind::Sqlite => SqlPool::Sqlite(Self::create_sqlite_pool(config, settings, read_only).await?),
            other => {
                return Err(AppError::Unsupported(format!(
                    "{} is not a SQL database",
                    other
                )))
            }
        };

        let database = match kind {
            DbKind::Sqlite => config.database.clone().unwrap_or_else(|| ":memory:".to_string()),
            _ => config.database.clone().unwrap_or_default(),
        };

        info!(
            "Created {} connection pool for '{}' (read_only: {})",
            kind,
            config.display_label(kind),
            read_only
        );

        Ok(Self {
            kind,
            pool,
            database,
            query_timeout_secs: settings.query_timeout_secs,
        })
    }

    /// Wrap an already-seeded in-memory SQLite pool
    #[cfg(test)]
    pub(crate) fn from_sqlite_pool(pool: SqlitePool, database: &str) -> Self {
        Self {
            kind: DbKind::Sqlite,
            pool: SqlPool::Sqlite(pool),
            database: database.to_string(),
            query_timeout_secs: 30,
        }
    }

    /// Parse SSL mode string to PgSslMode
    fn parse_ssl_mode(ssl_mode: &str) -> PgSslMode {
        match ssl_mode.to_lowercase().as_str() {
            "disable" => PgSslMode::Disable,
            "allow" => PgSslMode::Allow,
            "prefer" => PgSslMode::Prefer,
            "require" => PgSslMode::Require,
            "verify-ca" => PgSslMode::VerifyCa,
            "verify-full" => PgSslMode::VerifyFull,
            _ => PgSslMode::Prefer,
        }
    }

    fn parse_mysql_ssl_mode(ssl_mode: &str) -> MySqlSslMode {
        match ssl_mode.to_lowercase().replace('_', "-").as_str() {
            "disable" | "disabled" => MySqlSslMode::Disabled,
            "require" | "required" => MySqlSslMode::Required,
            "verify-ca" => MySqlSslMode::VerifyCa,
            "verify-full" | "verify-identity" => MySqlSslMode::VerifyIdentity,
            _ => MySqlSslMode::Preferred,
        }
    }

    fn required<'a>(value: Option<&'a str>, what: &str) -> Result<&'a str> {
        value
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::ValidationError(format!("{} is required", what)))
    }

    /// Build PostgreSQL connection options from the connection fields
    fn build_pg_options(config: &ConnectionConfig, read_only: bool) -> Result<PgConnectOptions> {
        let database = Self::required(config.database.as_deref(), "PostgreSQL database name")?;
        let username = Self::required(config.user.as_deref(), "PostgreSQL username")?;
        let password = resolve_optional_secret(config.password.as_deref())?.unwrap_or_default();
        let ssl_mode = Self::parse_ssl_mode(config.ssl_mode.as_deref().unwrap_or("prefer"));

        let mut options = PgConnectOptions::new()
            .host(config.host_or_localhost())
            .port(config.port_or_default(DbKind::Postgres))
            .database(database)
            .username(username)
            .password(&password)
            .ssl_mode(ssl_mode);

        if read_only {
            options = options.options([("default_transaction_read_only", "on")]);
        }

        Ok(options)
    }

    fn build_mysql_options(config: &ConnectionConfig) -> Result<MySqlConnectOptions> {
        let database = Self::required(config.database.as_deref(), "MySQL database name")?;
        let username = Self::required(config.user.as_deref(), "MySQL username")?;
        let password = resolve_optional_secret(config.password.as_deref())?.unwrap_or_default();
        let ssl_mode = Self::parse_mysql_ssl_mode(config.ssl_mode.as_deref().unwrap_or("preferred"));

        Ok(MySqlConnectOptions::new()
            .host(config.host_or_localhost())
            .port(config.port_or_default(DbKind::MySql))
            .database(database)
            .username(username)
            .password(&password)
            .ssl_mode(ssl_mode))
    }

    async fn create_pg_pool(
        config: &ConnectionConfig,
        settings: &PoolSettings,
        read_only: bool,
    ) -> Result<PgPool> {
        let options = Self::build_pg_options(config, read_only)?;

        PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(settings.idle_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| connect_error(DbKind::Postgres, e))
    }

    async fn create_mysql_pool(
        config: &ConnectionConfig,
        settings: &PoolSettings,
        read_only: bool,
    ) -> Result<MySqlPool> {
        let options = Self::build_mysql_options(config)?;

        MySqlPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(settings.idle_timeout_secs))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if read_only {
                        conn.execute("SET SESSION TRANSACTION READ ONLY").await?;
                    }
                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .map_err(|e| connect_error(DbKind::MySql, e))
    }

    async fn create_sqlite_pool(
        config: &ConnectionConfig,
        settings: &PoolSettings,
        read_only: bool,
    ) -> Result<SqlitePool> {
        let path = config
            .database
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(":memory:");

        if path == ":memory:" {
            // every connection to :memory: is a separate database, so keep exactly one.
            // `read_only` is not applied here: the database starts empty and is private to the pool
            let options = SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| connect_error(DbKind::Sqlite, e))?;
            return SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
                .map_err(|e| connect_error(DbKind::Sqlite, e));
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(read_only)
            .create_if_missing(!read_only);

        SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| connect_error(DbKind::Sqlite, e))
    }

    async fn run(&self, sql: &str, max_rows: usize) -> Result<ResultSet> {
        let (columns, mut rows) = match &self.pool {
            SqlPool::Postgres(pool) => fetch_capped!(pool, sql, max_rows, pg_cell),
            SqlPool::MySql(pool) => fetch_capped!(pool, sql, max_rows, mysql_cell),
            SqlPool::Sqlite(pool) => fetch_capped!(pool, sql, max_rows, sqlite_cell),
        };

        let truncated = rows.len() > max_rows;
        rows.truncate(max_rows);

        let mut result = ResultSet::new(columns, rows);
        result.truncated = truncated;
        Ok(result)
    }

    async fn describe_postgres(&self, pool: &PgPool) -> Result<Catalog> {
        let mut catalog = Catalog::default();

        let tables: Vec<(String, Option<i64>)> = sqlx::query_as(
            r#"
            SELECT
                t.table_name::text AS table_name,
                c.reltuples::bigint AS row_count
            FROM information_schema.tables t
            LEFT JOIN pg_class c
                ON c.relname = t.table_name
                AND c.relnamespace = 'public'::regnamespace
            WHERE t.table_schema = 'public'
                AND t.table_type = 'BASE TABLE'
            ORDER BY t.table_name
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list tables: {}", e)))?;
        // reltuples is -1 until the table has been analyzed
        catalog.tables = tables
            .into_iter()
            .map(|(name, count)| (name, count.filter(|c| *c >= 0)))
            .collect();

        let columns: Vec<(String, String, String, bool)> = sqlx::query_as(
            r#"
            SELECT
                table_name::text,
                column_name::text,
                data_type::text,
                is_nullable = 'YES' AS is_nullable
            FROM information_schema.columns
            WHERE table_schema = 'public'
            ORDER BY table_name, ordinal_position
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list columns: {}", e)))?;
        catalog.columns = columns
            .into_iter()
            .map(|(table, name, data_type, nullable)| {
                (table, column_doc(name, data_type, nullable))
            })
            .collect();

        let primary_keys: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT kcu.table_name::text, kcu.column_name::text
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            WHERE tc.table_schema = 'public'
                AND tc.constraint_type = 'PRIMARY KEY'
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list primary keys: {}", e)))?;
        catalog.primary_keys = primary_keys.into_iter().collect();

        let foreign_keys: Vec<(String, String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT
                kcu.table_name::text,
                kcu.column_name::text,
                ccu.table_name::text,
                ccu.column_name::text
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
                ON ccu.constraint_name = tc.constraint_name
                AND ccu.table_schema = tc.table_schema
            WHERE tc.table_schema = 'public'
                AND tc.constraint_type = 'FOREIGN KEY'
            ORDER BY kcu.table_name, kcu.ordinal_position
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list foreign keys: {}", e)))?;
        catalog.foreign_keys = foreign_keys
            .into_iter()
            .map(|(table, column, references_table, references_column)| {
                (
                    table,
                    ForeignKeyDoc {
                        column,
                        references_table,
                        references_column,
                    },
                )
            })
            .collect();

        let indexes: Vec<(String, String, bool, Option<String>)> = sqlx::query_as(
            r#"
            SELECT
                t.relname::text,
                i.relname::text,
                ix.indisunique,
                a.attname::text
            FROM pg_class t
            JOIN pg_namespace n ON n.oid = t.relnamespace
            JOIN pg_index ix ON t.oid = ix.indrelid
            JOIN pg_class i ON i.oid = ix.indexrelid
            LEFT JOIN pg_attribute a
                ON a.attrelid = t.oid
                AND a.attnum = ANY(ix.indkey)
            WHERE n.nspname = 'public'
                AND t.relkind = 'r'
            ORDER BY t.relname, i.relname, a.attnum
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list indexes: {}", e)))?;
        catalog.indexes = indexes;

        Ok(catalog)
    }

    async fn describe_mysql(&self, pool: &MySqlPool) -> Result<Catalog> {
        let mut catalog = Catalog::default();

        catalog.tables = sqlx::query_as(
            r#"
            SELECT
                CAST(table_name AS CHAR) AS table_name,
                CAST(table_rows AS SIGNED) AS row_count
            FROM information_schema.tables
            WHERE table_schema = DATABASE()
                AND table_type = 'BASE TABLE'
            ORDER BY table_name
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list tables: {}", e)))?;

        let columns: Vec<(String, String, String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT
                CAST(table_name AS CHAR),
                CAST(column_name AS CHAR),
                CAST(column_type AS CHAR),
                CAST(is_nullable = 'YES' AS SIGNED),
                CAST(column_key = 'PRI' AS SIGNED)
            FROM information_schema.columns
            WHERE table_schema = DATABASE()
            ORDER BY table_name, ordinal_position
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list columns: {}", e)))?;
        for (table, name, data_type, nullable, primary) in columns {
            if primary != 0 {
                catalog.primary_keys.insert((table.clone(), name.clone()));
            }
            catalog
                .columns
                .push((table, column_doc(name, data_type, nullable != 0)));
        }

        let foreign_keys: Vec<(String, String, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT
                CAST(table_name AS CHAR),
                CAST(column_name AS CHAR),
                CAST(referenced_table_name AS CHAR),
                CAST(referenced_column_name AS CHAR)
            FROM information_schema.key_column_usage
            WHERE table_schema = DATABASE()
                AND referenced_table_name IS NOT NULL
            ORDER BY table_name, ordinal_position
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list foreign keys: {}", e)))?;
        catalog.foreign_keys = foreign_keys
            .into_iter()
            .map(|(table, column, references_table, references_column)| {
                (
                    table,
                    ForeignKeyDoc {
                        column,
                        references_table,
                        references_column,
                    },
                )
            })
            .collect();

        let indexes: Vec<(String, String, i64, Option<String>)> = sqlx::query_as(
            r#"
            SELECT
                CAST(table_name AS CHAR),
                CAST(index_name AS CHAR),
                CAST(non_unique AS SIGNED),
                CAST(column_name AS CHAR)
            FROM information_schema.statistics
            WHERE table_schema = DATABASE()
            ORDER BY table_name, index_name, seq_in_index
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list indexes: {}", e)))?;
        catalog.indexes = indexes
            .into_iter()
            .map(|(table, index, non_unique, column)| (table, index, non_unique == 0, column))
            .collect();

        Ok(catalog)
    }

    async fn describe_sqlite(&self, pool: &SqlitePool) -> Result<Catalog> {
        let mut catalog = Catalog::default();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list tables: {}", e)))?;

        for table in tables {
            let count: Option<i64> =
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(&table)))
                    .fetch_one(pool)
                    .await
                    .ok();

            let columns: Vec<(String, String, i64, i64)> = sqlx::query_as(
                r#"SELECT name, type, "notnull", pk FROM pragma_table_info(?)"#,
            )
            .bind(&table)
            .fetch_all(pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list columns: {}", e)))?;
            for (name, data_type, not_null, pk) in columns {
                if pk > 0 {
                    catalog.primary_keys.insert((table.clone(), name.clone()));
                }
                catalog
                    .columns
                    .push((table.clone(), column_doc(name, data_type, not_null == 0)));
            }

            let foreign_keys: Vec<(String, String, Option<String>)> = sqlx::query_as(
                r#"SELECT "from", "table", "to" FROM pragma_foreign_key_list(?) ORDER BY id, seq"#,
            )
            .bind(&table)
            .fetch_all(pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list foreign keys: {}", e)))?;
            for (column, references_table, references_column) in foreign_keys {
                catalog.foreign_keys.push((
                    table.clone(),
                    ForeignKeyDoc {
                        column,
                        references_table,
                        references_column,
                    },
                ));
            }

            let indexes: Vec<(String, i64)> = sqlx::query_as(
                r#"SELECT name, "unique" FROM pragma_index_list(?) ORDER BY name"#,
            )
            .bind(&table)
            .fetch_all(pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list indexes: {}", e)))?;
            for (index, unique) in indexes {
                let index_columns: Vec<Option<String>> =
                    sqlx::query_scalar("SELECT name FROM pragma_index_info(?) ORDER BY seqno")
                        .bind(&index)
                        .fetch_all(pool)
                        .await
                        .map_err(|e| {
                            AppError::DatabaseError(format!("Failed to list index columns: {}", e))
                        })?;
                for column in index_columns {
                    catalog
                        .indexes
                        .push((table.clone(), index.clone(), unique != 0, column));
                }
            }

            catalog.tables.push((table, count));
        }

        Ok(catalog)
    }
}

#[async_trait]
impl DatabaseBackend for SqlBackend {
    fn kind(&self) -> DbKind {
        self.kind
    }

    async fn ping(&self) -> Result<()> {
        let result = match &self.pool {
            SqlPool::Postgres(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
            SqlPool::MySql(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
            SqlPool::Sqlite(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
        };
        result.map_err(|e| AppError::DatabaseError(format!("Health check failed: {}", e)))
    }

    async fn describe(&self) -> Result<SchemaDoc> {
        let catalog = with_timeout(self.query_timeout_secs, "Schema introspection", async {
            match &self.pool {
                SqlPool::Postgres(pool) => self.describe_postgres(pool).await,
                SqlPool::MySql(pool) => self.describe_mysql(pool).await,
                SqlPool::Sqlite(pool) => self.describe_sqlite(pool).await,
            }
        })
        .await?;

        let doc = catalog.into_doc(&self.database, self.kind);
        debug!(
            "Described {} tables on {} '{}'",
            doc.entities.len(),
            self.kind,
            self.database
        );
        Ok(doc)
    }

    async fn execute(&self, query: &GeneratedQuery, max_rows: usize) -> Result<ResultSet> {
        let text = query.to_string();
        let sql = text.trim().trim_end_matches(';').trim();
        with_timeout(self.query_timeout_secs, "Query", self.run(sql, max_rows)).await
    }

    async fn close(&self) {
        match &self.pool {
            SqlPool::Postgres(pool) => pool.close().await,
            SqlPool::MySql(pool) => pool.close().await,
            SqlPool::Sqlite(pool) => pool.close().await,
        }
    }
}

/// Raw catalog rows, joined into entity docs once all queries are in
#[derive(Default)]
struct Catalog {
    tables: Vec<(String, Option<i64>)>,
    columns: Vec<(String, ColumnDoc)>,
    primary_keys: HashSet<(String, String)>,
    foreign_keys: Vec<(String, ForeignKeyDoc)>,
    /// (table, index, unique, column)
    indexes: Vec<(String, String, bool, Option<String>)>,
}

impl Catalog {
    fn into_doc(self, database: &str, kind: DbKind) -> SchemaDoc {
        let mut doc = SchemaDoc::new(database, kind);

        for (table, row_count) in &self.tables {
            let mut entity = EntityDoc::new(table.clone(), EntityKind::Table);
            entity.row_count = *row_count;

            entity.columns = self
                .columns
                .iter()
                .filter(|(t, _)| t == table)
                .map(|(_, column)| {
                    let mut column = column.clone();
                    column.primary_key = self
                        .primary_keys
                        .contains(&(table.clone(), column.name.clone()));
                    column
                })
                .collect();

            entity.foreign_keys = self
                .foreign_keys
                .iter()
                .filter(|(t, _)| t == table)
                .map(|(_, fk)| fk.clone())
                .collect();

            for (_, name, unique, column) in self.indexes.iter().filter(|(t, ..)| t == table) {
                let position = entity.indexes.iter().position(|i| i.name == *name);
                let index = match position {
                    Some(i) => &mut entity.indexes[i],
                    None => {
                        entity.indexes.push(IndexDoc {
                            name: name.clone(),
                            columns: Vec::new(),
                            unique: *unique,
                        });
                        let last = entity.indexes.len() - 1;
                        &mut entity.indexes[last]
                    }
                };
                if let Some(column) = column {
                    index.columns.push(column.clone());
                }
            }

            doc.entities.push(entity);
        }

        doc
    }
}

fn column_doc(name: String, data_type: String, nullable: bool) -> ColumnDoc {
    ColumnDoc {
        name,
        data_type: Some(data_type).filter(|t| !t.is_empty()),
        nullable: Some(nullable),
        primary_key: false,
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn float(n: f64) -> Value {
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

fn decimal(d: BigDecimal) -> Value {
    match d.to_f64().filter(|f| f.is_finite()) {
        Some(f) => float(f),
        None => Value::String(d.to_string()),
    }
}

fn timestamp(dt: DateTime<Utc>) -> Value {
    Value::String(dt.to_rfc3339())
}

fn text<T: ToString>(v: T) -> Value {
    Value::String(v.to_string())
}

fn bytes(b: Vec<u8>) -> Value {
    Value::String(BASE64.encode(b))
}

fn pg_cell(row: &PgRow, index: usize) -> Value {
    decode_cell!(row, index;
        String => Value::String,
        i64 => Value::from,
        i32 => Value::from,
        i16 => Value::from,
        f64 => float,
        f32 => |n: f32| float(n as f64),
        BigDecimal => decimal,
        bool => Value::Bool,
        DateTime<Utc> => timestamp,
        NaiveDateTime => text,
        NaiveDate => text,
        NaiveTime => text,
        Value => |v: Value| v,
        Vec<u8> => bytes,
    )
}

fn mysql_cell(row: &MySqlRow, index: usize) -> Value {
    decode_cell!(row, index;
        String => Value::String,
        i64 => Value::from,
        u64 => Value::from,
        i32 => Value::from,
        f64 => float,
        f32 => |n: f32| float(n as f64),
        BigDecimal => decimal,
        bool => Value::Bool,
        DateTime<Utc> => timestamp,
        NaiveDateTime => text,
        NaiveDate => text,
        NaiveTime => text,
        Value => |v: Value| v,
        Vec<u8> => bytes,
    )
}

fn sqlite_cell(row: &SqliteRow, index: usize) -> Value {
    decode_cell!(row, index;
        String => Value::String,
        i64 => Value::from,
        f64 => float,
        bool => Value::Bool,
        NaiveDateTime => text,
        NaiveDate => text,
        Vec<u8> => bytes,
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// In-memory shop database with two related tables
    pub(crate) async fn seeded_backend() -> SqlBackend {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        for statement in [
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL, city TEXT)",
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER NOT NULL REFERENCES customers(id), total REAL, ordered_on TEXT)",
            "CREATE INDEX idx_orders_customer ON orders(customer_id)",
            "INSERT INTO customers (id, name, city) VALUES (1, 'Ana', 'Lisbon'), (2, 'Bo', 'Oslo'), (3, 'Cy', NULL)",
            "INSERT INTO orders (id, customer_id, total, ordered_on) VALUES (1, 1, 10.5, '2024-01-01'), (2, 1, 20.0, '2024-01-02'), (3, 2, 7.25, '2024-01-02')",
        ] {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }

        SqlBackend::from_sqlite_pool(pool, "shop")
    }

    #[test]
    fn test_parse_ssl_mode() {
        assert!(matches!(SqlBackend::parse_ssl_mode("disable"), PgSslMode::Disable));
        assert!(matches!(SqlBackend::parse_ssl_mode("require"), PgSslMode::Require));
        assert!(matches!(SqlBackend::parse_ssl_mode("PREFER"), PgSslMode::Prefer));
        assert!(matches!(SqlBackend::parse_ssl_mode("unknown"), PgSslMode::Prefer));
        assert!(matches!(
            SqlBackend::parse_mysql_ssl_mode("verify_identity"),
            MySqlSslMode::VerifyIdentity
        ));
        assert!(matches!(
            SqlBackend::parse_mysql_ssl_mode("disabled"),
            MySqlSslMode::Disabled
        ));
    }

    #[test]
    fn test_pg_options_require_database_and_user() {
        let mut config = ConnectionConfig::default();
        assert!(matches!(
            SqlBackend::build_pg_options(&config, true),
            Err(AppError::ValidationError(_))
        ));
        config.database = Some("shop".to_string());
        config.user = Some("reader".to_string());
        config.password = Some("plain:pw".to_string());
        assert!(SqlBackend::build_pg_options(&config, true).is_ok());
    }

    #[tokio::test]
    async fn test_sqlite_file_opens_read_only() {
        let path = std::env::temp_dir().join(format!("querybridge-{}.db", uuid::Uuid::new_v4()));
        let config = ConnectionConfig {
            database: Some(path.to_string_lossy().to_string()),
            ..ConnectionConfig::default()
        };
        let settings = PoolSettings::default();

        let writable = SqlBackend::create_sqlite_pool(&config, &settings, false).await.unwrap();
        sqlx::query("CREATE TABLE notes (id INTEGER PRIMARY KEY)")
            .execute(&writable)
            .await
            .unwrap();
        writable.close().await;

        let read_only = SqlBackend::create_sqlite_pool(&config, &settings, true).await.unwrap();
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notes")
            .fetch_one(&read_only)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
        assert!(sqlx::query("INSERT INTO notes (id) VALUES (1)")
            .execute(&read_only)
            .await
            .is_err());
        read_only.close().await;

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[tokio::test]
    async fn test_execute_select_decodes_cells() {
        let backend = seeded_backend().await;
        let result = backend
            .execute(
                &GeneratedQuery::Sql(
                    "SELECT id, name, city FROM customers ORDER BY id;".to_string(),
                ),
                100,
            )
            .await
            .unwrap();

        assert_eq!(result.columns, vec!["id", "name", "city"]);
        assert_eq!(result.rows.len(), 3);
        assert_eq!(result.rows[0], vec![json!(1), json!("Ana"), json!("Lisbon")]);
        assert_eq!(result.rows[2][2], Value::Null);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn test_execute_caps_rows_and_flags_truncation() {
        let backend = seeded_backend().await;
        let result = backend
            .execute(
                &GeneratedQuery::Sql("SELECT id FROM orders ORDER BY id".to_string()),
                2,
            )
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 2);
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn test_empty_result_keeps_column_names() {
        let backend = seeded_backend().await;
        let result = backend
            .execute(
                &GeneratedQuery::Sql("SELECT name, city FROM customers WHERE id = 99".to_string()),
                10,
            )
            .await
            .unwrap();
        assert!(result.rows.is_empty());
        assert_eq!(result.columns, vec!["name", "city"]);
    }

    #[tokio::test]
    async fn test_aggregates_decode_as_numbers() {
        let backend = seeded_backend().await;
        let result = backend
            .execute(
                &GeneratedQuery::Sql(
                    "SELECT c.name, SUM(o.total) AS spent FROM orders o JOIN customers c ON c.id = o.customer_id GROUP BY c.name ORDER BY spent DESC".to_string(),
                ),
                10,
            )
            .await
            .unwrap();
        assert_eq!(result.rows[0], vec![json!("Ana"), json!(30.5)]);
        assert_eq!(result.rows[1], vec![json!("Bo"), json!(7.25)]);
    }

    #[tokio::test]
    async fn test_bad_sql_is_database_error() {
        let backend = seeded_backend().await;
        let result = backend
            .execute(&GeneratedQuery::Sql("SELECT nope FROM missing".to_string()), 10)
            .await;
        assert!(matches!(result, Err(AppError::DatabaseError(_))));
    }

    #[tokio::test]
    async fn test_describe_sqlite_schema() {
        let backend = seeded_backend().await;
        let doc = backend.describe().await.unwrap();

        assert_eq!(doc.database, "shop");
        let names: Vec<&str> = doc.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["customers", "orders"]);

        let customers = &doc.entities[0];
        assert_eq!(customers.row_count, Some(3));
        assert!(customers.columns[0].primary_key);
        assert_eq!(customers.columns[1].name, "name");
        assert_eq!(customers.columns[1].nullable, Some(false));

        let orders = &doc.entities[1];
        assert_eq!(orders.foreign_keys.len(), 1);
        assert_eq!(orders.foreign_keys[0].column, "customer_id");
        assert_eq!(orders.foreign_keys[0].references_table, "customers");
        assert_eq!(orders.indexes[0].name, "idx_orders_customer");
        assert_eq!(orders.indexes[0].columns, vec!["customer_id"]);
        assert!(!orders.indexes[0].unique);
    }

    #[tokio::test]
    async fn test_ping_and_kind() {
        let backend = seeded_backend().await;
        assert_eq!(backend.kind(), DbKind::Sqlite);
        assert!(backend.ping().await.is_ok());
    }
}
