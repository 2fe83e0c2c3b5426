use std::path::Path;
use std::sync::Mutex;

use futures::future::BoxFuture;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::debug;

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::SqlExecutor;
use trellis_core::types::{ConnectionId, QueryOutput};

/// SQLite-backed SQL execution collaborator.
///
/// Owns a single connection identified by a `ConnectionId`; queries against
/// any other id are rejected as a database error rather than silently run
/// against the wrong store.
pub struct SqliteExecutor {
    id: ConnectionId,
    conn: Mutex<Connection>,
}

impl SqliteExecutor {
    /// Open a database at the given path.
    pub fn open(id: ConnectionId, path: &Path) -> Result<Self> {
        let conn =
            Connection::open(path).map_err(|e| TrellisError::Database(e.to_string()))?;
        debug!(id = %id, path = %path.display(), "SQLite connection opened");
        Ok(Self {
            id,
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory(id: ConnectionId) -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| TrellisError::Database(e.to_string()))?;
        Ok(Self {
            id,
            conn: Mutex::new(conn),
        })
    }

    /// Run arbitrary setup statements (test fixtures, migrations).
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn
            .lock()
            .expect("sqlite lock")
            .execute_batch(sql)
            .map_err(|e| TrellisError::Database(e.to_string()))
    }

    fn query(&self, sql: &str) -> Result<QueryOutput> {
        let conn = self.conn.lock().expect("sqlite lock");
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| TrellisError::Execution(e.to_string()))?;

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let n = columns.len();

        let mut rows = Vec::new();
        let mut raw = stmt
            .query([])
            .map_err(|e| TrellisError::Execution(e.to_string()))?;
        while let Some(row) = raw
            .next()
            .map_err(|e| TrellisError::Execution(e.to_string()))?
        {
            let mut record = Vec::with_capacity(n);
            for i in 0..n {
                let value = match row
                    .get_ref(i)
                    .map_err(|e| TrellisError::Execution(e.to_string()))?
                {
                    ValueRef::Null => serde_json::Value::Null,
                    ValueRef::Integer(v) => serde_json::Value::from(v),
                    ValueRef::Real(v) => serde_json::Value::from(v),
                    ValueRef::Text(t) => {
                        serde_json::Value::String(String::from_utf8_lossy(t).into_owned())
                    }
                    ValueRef::Blob(b) => serde_json::Value::String(format!("<{} bytes>", b.len())),
                };
                record.push(value);
            }
            rows.push(record);
        }

        Ok(QueryOutput { columns, rows })
    }
}

impl SqlExecutor for SqliteExecutor {
    fn run_query(&self, conn: &ConnectionId, sql: &str) -> BoxFuture<'_, Result<QueryOutput>> {
        let conn = conn.clone();
        let sql = sql.to_string();

        Box::pin(async move {
            if conn != self.id {
                return Err(TrellisError::Database(format!(
                    "unknown connection '{}'",
                    conn
                )));
            }
            debug!(connection = %conn, "Executing query");
            self.query(&sql)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> SqliteExecutor {
        let exec = SqliteExecutor::in_memory(ConnectionId::new("test")).unwrap();
        exec.execute_batch(
            "CREATE TABLE users (user_id INTEGER PRIMARY KEY, is_active INTEGER, spend REAL);
             INSERT INTO users VALUES (1, 1, 120.5), (2, 0, 30.0), (3, 1, NULL);",
        )
        .unwrap();
        exec
    }

    #[tokio::test]
    async fn test_query_rows_and_columns() {
        let exec = fixture();
        let out = exec
            .run_query(
                &ConnectionId::new("test"),
                "SELECT is_active, spend FROM users ORDER BY user_id",
            )
            .await
            .unwrap();

        assert_eq!(out.columns, vec!["is_active", "spend"]);
        assert_eq!(out.rows.len(), 3);
        assert_eq!(out.rows[0][0], serde_json::json!(1));
        assert_eq!(out.rows[1][1], serde_json::json!(30.0));
        assert!(out.rows[2][1].is_null());
    }

    #[tokio::test]
    async fn test_execution_error_is_recoverable() {
        let exec = fixture();
        let err = exec
            .run_query(&ConnectionId::new("test"), "SELECT * FROM missing_table")
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::Execution(_)));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_unknown_connection_rejected() {
        let exec = fixture();
        let err = exec
            .run_query(&ConnectionId::new("other"), "SELECT 1")
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::Database(_)));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_empty_result_is_success() {
        let exec = fixture();
        let out = exec
            .run_query(
                &ConnectionId::new("test"),
                "SELECT user_id FROM users WHERE spend > 1000",
            )
            .await
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(out.columns, vec!["user_id"]);
    }
}
