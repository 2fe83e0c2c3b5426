use std::collections::HashMap;
use std::path::Path;

use futures::future::BoxFuture;
use rusqlite::Connection;
use tracing::debug;

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::SchemaStore;
use trellis_core::types::{ColumnSchema, ForeignKey, TableSchema};

/// Schema metadata cache over a SQLite database.
///
/// Introspects `sqlite_master` plus the table PRAGMAs once at construction
/// and serves lookups from memory afterwards, so steps building prompts
/// never touch the database.
pub struct SchemaCache {
    tables: HashMap<String, TableSchema>,
    order: Vec<String>,
}

impl SchemaCache {
    /// Introspect the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn =
            Connection::open(path).map_err(|e| TrellisError::Database(e.to_string()))?;
        Self::from_connection(&conn)
    }

    /// Introspect an already-open connection (used by tests).
    pub fn from_connection(conn: &Connection) -> Result<Self> {
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
            )
            .map_err(|e| TrellisError::Database(e.to_string()))?;

        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| TrellisError::Database(e.to_string()))?
            .collect::<rusqlite::Result<_>>()
            .map_err(|e| TrellisError::Database(e.to_string()))?;

        let mut tables = HashMap::new();
        for name in &names {
            tables.insert(name.clone(), introspect_table(conn, name)?);
        }

        debug!(tables = tables.len(), "Schema cache built");
        Ok(Self {
            tables,
            order: names,
        })
    }

    /// Build a cache from preassembled schemas (test double).
    pub fn from_schemas(schemas: Vec<TableSchema>) -> Self {
        let order = schemas.iter().map(|s| s.name.clone()).collect();
        let tables = schemas.into_iter().map(|s| (s.name.clone(), s)).collect();
        Self { tables, order }
    }
}

fn introspect_table(conn: &Connection, table: &str) -> Result<TableSchema> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info(\"{}\")", table))
        .map_err(|e| TrellisError::Database(e.to_string()))?;

    let columns: Vec<ColumnSchema> = stmt
        .query_map([], |row| {
            Ok(ColumnSchema {
                name: row.get::<_, String>(1)?,
                dtype: row.get::<_, String>(2)?,
                primary_key: row.get::<_, i64>(5)? > 0,
            })
        })
        .map_err(|e| TrellisError::Database(e.to_string()))?
        .collect::<rusqlite::Result<_>>()
        .map_err(|e| TrellisError::Database(e.to_string()))?;

    let mut stmt = conn
        .prepare(&format!("PRAGMA foreign_key_list(\"{}\")", table))
        .map_err(|e| TrellisError::Database(e.to_string()))?;

    let foreign_keys: Vec<ForeignKey> = stmt
        .query_map([], |row| {
            Ok(ForeignKey {
                ref_table: row.get::<_, String>(2)?,
                column: row.get::<_, String>(3)?,
                ref_column: row.get::<_, String>(4)?,
            })
        })
        .map_err(|e| TrellisError::Database(e.to_string()))?
        .collect::<rusqlite::Result<_>>()
        .map_err(|e| TrellisError::Database(e.to_string()))?;

    Ok(TableSchema {
        name: table.to_string(),
        columns,
        foreign_keys,
    })
}

impl SchemaStore for SchemaCache {
    fn table_names(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move { Ok(self.order.clone()) })
    }

    fn table_schema(&self, table: &str) -> BoxFuture<'_, Result<Option<TableSchema>>> {
        let table = table.to_string();
        Box::pin(async move { Ok(self.tables.get(&table).cloned()) })
    }
}
