use trellis_core::types::{CausalEstimate, ConnectionId, NumericFrame, QueryOutput, Strategy};
use trellis_graph::{FlowState, RetryState, StepFailure};

use super::query::CausalQuery;

/// State threaded through the causal-analysis workflow.
///
/// `sql_query` is the forked field: supplied up front (together with the
/// variable spec) it sends the run straight to `fetch`; absent, the
/// parse/generate steps derive it from the question. `fix_sql` owns it
/// across repair iterations either way.
#[derive(Debug, Clone)]
pub struct CausalTaskState {
    pub question: String,
    pub connection: ConnectionId,

    pub sql_query: Option<String>,
    pub parsed: Option<CausalQuery>,
    pub schema_brief: Option<String>,
    pub result: Option<QueryOutput>,
    pub frame: Option<NumericFrame>,
    pub strategy: Option<Strategy>,
    pub estimate: Option<CausalEstimate>,
    pub answer: Option<String>,

    pub retry: RetryState,
}

impl CausalTaskState {
    pub fn new(question: impl Into<String>, connection: ConnectionId) -> Self {
        Self {
            question: question.into(),
            connection,
            sql_query: None,
            parsed: None,
            schema_brief: None,
            result: None,
            frame: None,
            strategy: None,
            estimate: None,
            answer: None,
            retry: RetryState::default(),
        }
    }

    /// Supply a precomputed query and its variable spec, bypassing the
    /// parse/generate steps.
    pub fn with_sql(mut self, sql: impl Into<String>, parsed: CausalQuery) -> Self {
        self.sql_query = Some(sql.into());
        self.parsed = Some(parsed);
        self
    }
}

impl FlowState for CausalTaskState {
    fn record_failure(&mut self, failure: StepFailure) {
        self.retry.last_failure = Some(failure);
    }

    fn last_failure(&self) -> Option<&StepFailure> {
        self.retry.last_failure.as_ref()
    }
}
