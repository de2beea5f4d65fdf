pub mod connection;
pub mod db_kind;
pub mod error;
pub mod llm_config;
pub mod query;
pub mod role;
pub mod schema;
