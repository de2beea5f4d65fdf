pub mod ask;
pub mod chart;
pub mod connection_manager;
pub mod query_guard;
pub mod query_translator;
pub mod schema_docs;
pub mod summarizer;
pub mod table_render;
