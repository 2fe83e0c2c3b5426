use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{CausalEstimate, ConnectionId, EstimateRequest, QueryOutput, TableSchema};

/// LLM completion collaborator.
///
/// Steps hand a fully rendered prompt in and receive raw text back; parsing
/// into structured values (and the parse-error retry policy) lives with the
/// caller, not the client.
pub trait LlmClient: Send + Sync + 'static {
    fn complete(&self, prompt: &str) -> BoxFuture<'_, Result<String>>;
}

/// SQL execution collaborator.
///
/// Execution failures surface as `TrellisError::Execution`; whether that is
/// retried or escalated is the workflow's decision.
pub trait SqlExecutor: Send + Sync + 'static {
    fn run_query(&self, conn: &ConnectionId, sql: &str) -> BoxFuture<'_, Result<QueryOutput>>;
}

/// Read-only schema metadata collaborator.
///
/// Absence of a table is not an error at this boundary — callers that need
/// the schema raise `TrellisError::MissingMetadata` themselves.
pub trait SchemaStore: Send + Sync + 'static {
    fn table_names(&self) -> BoxFuture<'_, Result<Vec<String>>>;

    fn table_schema(&self, table: &str) -> BoxFuture<'_, Result<Option<TableSchema>>>;
}

/// Causal-effect estimation collaborator.
///
/// Identification, estimation, and refutation algorithms live behind this
/// seam; the workflow only prepares the request and interprets the estimate.
pub trait CausalEngine: Send + Sync + 'static {
    fn estimate(&self, request: EstimateRequest) -> BoxFuture<'_, Result<CausalEstimate>>;
}
