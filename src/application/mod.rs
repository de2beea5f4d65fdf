pub mod use_cases;

pub use use_cases::ask::AskUseCase;
pub use use_cases::schema_docs::SchemaDocsUseCase;
