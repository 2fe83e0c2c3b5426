//! SQLite-backed collaborators: query execution and schema metadata.

pub mod executor;
pub mod metadata;

pub use executor::SqliteExecutor;
pub use metadata::SchemaCache;
