use crate::domain::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Database families a connection can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbKind {
    MySql,
    Postgres,
    Sqlite,
    MongoDb,
    Redis,
    /// Cloud Firestore, named after the Firebase console it ships with
    Firebase,
    Elasticsearch,
    Custom,
}

impl DbKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbKind::MySql => "mysql",
            DbKind::Postgres => "postgres",
            DbKind::Sqlite => "sqlite",
            DbKind::MongoDb => "mongodb",
            DbKind::Redis => "redis",
            DbKind::Firebase => "firebase",
            DbKind::Elasticsearch => "elasticsearch",
            DbKind::Custom => "custom",
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            DbKind::MySql => Some(3306),
            DbKind::Postgres => Some(5432),
            DbKind::MongoDb => Some(27017),
            DbKind::Redis => Some(6379),
            DbKind::Elasticsearch => Some(9200),
            DbKind::Sqlite | DbKind::Firebase | DbKind::Custom => None,
        }
    }

    pub fn is_sql(&self) -> bool {
        matches!(self, DbKind::MySql | DbKind::Postgres | DbKind::Sqlite)
    }

    /// Dialect name used when asking the model for SQL
    pub fn dialect_name(&self) -> &'static str {
        match self {
            DbKind::MySql => "MYSQL",
            DbKind::Postgres => "POSTGRES",
            DbKind::Sqlite => "SQLITE",
            DbKind::MongoDb => "MONGODB",
            DbKind::Redis => "REDIS",
            DbKind::Firebase => "FIRESTORE",
            DbKind::Elasticsearch => "ELASTICSEARCH",
            DbKind::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for DbKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" => Ok(DbKind::MySql),
            "postgres" | "postgresql" => Ok(DbKind::Postgres),
            "sqlite" => Ok(DbKind::Sqlite),
            "mongodb" | "mongo" => Ok(DbKind::MongoDb),
            "redis" => Ok(DbKind::Redis),
            "firebase" | "firestore" => Ok(DbKind::Firebase),
            "elasticsearch" => Ok(DbKind::Elasticsearch),
            "custom" => Ok(DbKind::Custom),
            other => Err(AppError::Unsupported(format!(
                "Unsupported database type: {}",
                other
            ))),
        }
    }
}
