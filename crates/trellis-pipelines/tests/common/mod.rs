use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::SqlExecutor;
use trellis_core::types::{ColumnSchema, ConnectionId, QueryOutput, TableSchema};

/// Scripted SQL executor: each call consumes the next outcome.
pub struct MockSql {
    script: Mutex<VecDeque<Result<QueryOutput>>>,
}

impl MockSql {
    pub fn scripted(outcomes: Vec<Result<QueryOutput>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
        }
    }
}

impl SqlExecutor for MockSql {
    fn run_query(&self, _conn: &ConnectionId, _sql: &str) -> BoxFuture<'_, Result<QueryOutput>> {
        let next = self.script.lock().expect("script lock").pop_front();
        Box::pin(async move {
            next.unwrap_or_else(|| Err(TrellisError::Database("mock sql script exhausted".into())))
        })
    }
}

pub fn output(columns: &[&str], rows: Vec<Vec<serde_json::Value>>) -> QueryOutput {
    QueryOutput {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows,
    }
}

pub fn exec_err(msg: &str) -> TrellisError {
    TrellisError::Execution(msg.to_string())
}

pub fn table(name: &str, columns: &[(&str, bool)]) -> TableSchema {
    TableSchema {
        name: name.to_string(),
        columns: columns
            .iter()
            .map(|(col, pk)| ColumnSchema {
                name: col.to_string(),
                dtype: "REAL".into(),
                primary_key: *pk,
            })
            .collect(),
        foreign_keys: vec![],
    }
}
