use serde::{Deserialize, Serialize};

use trellis_core::types::{ConnectionId, QueryOutput};
use trellis_graph::{FlowState, RetryState, StepFailure};

/// Final output of a text-to-SQL run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlRunOutput {
    pub question: String,
    pub sql: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub error: Option<String>,
    pub review_note: Option<String>,
}

/// State threaded through the text-to-SQL workflow.
///
/// Field ownership:
/// - inputs (`question`, `connection`, `notes`) are set at construction and
///   never written by a step;
/// - `schema_brief`/`fk_brief` are written once by `schema`;
/// - `candidate_sql` is written by `draft` and re-written only by `repair`,
///   the designated owner across retry iterations;
/// - `result`/`result_note` are written by `execute` on success;
/// - `review_note` by `review`, `output` by `finalize`;
/// - `retry` holds the loop's control fields.
#[derive(Debug, Clone)]
pub struct SqlTaskState {
    pub question: String,
    pub connection: ConnectionId,
    pub notes: Option<String>,

    pub schema_brief: Option<String>,
    pub fk_brief: Option<String>,
    pub candidate_sql: Option<String>,
    pub result: Option<QueryOutput>,
    pub result_note: Option<String>,
    pub review_note: Option<String>,
    pub output: Option<SqlRunOutput>,

    pub retry: RetryState,
}

impl SqlTaskState {
    pub fn new(question: impl Into<String>, connection: ConnectionId) -> Self {
        Self {
            question: question.into(),
            connection,
            notes: None,
            schema_brief: None,
            fk_brief: None,
            candidate_sql: None,
            result: None,
            result_note: None,
            review_note: None,
            output: None,
            retry: RetryState::default(),
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

impl FlowState for SqlTaskState {
    fn record_failure(&mut self, failure: StepFailure) {
        self.retry.last_failure = Some(failure);
    }

    fn last_failure(&self) -> Option<&StepFailure> {
        self.retry.last_failure.as_ref()
    }
}
