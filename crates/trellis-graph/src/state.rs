use serde::{Deserialize, Serialize};

use trellis_core::TrellisError;

/// What kind of recoverable failure a step reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Execution,
    Parse,
    MissingMetadata,
}

/// A recoverable failure deposited into workflow state.
///
/// The executor writes one of these whenever a step returns a recoverable
/// error; the step's router reads it to decide between repair, escalation,
/// and termination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    /// Name of the step that failed.
    pub step: String,
    pub kind: FailureKind,
    pub message: String,
}

impl StepFailure {
    /// Build a failure record from a recoverable error. Returns `None` for
    /// fatal errors — those never land in state.
    pub fn from_error(step: &str, err: &TrellisError) -> Option<Self> {
        let kind = match err {
            TrellisError::Validation(_) => FailureKind::Validation,
            TrellisError::Execution(_) => FailureKind::Execution,
            TrellisError::Parse(_) => FailureKind::Parse,
            TrellisError::MissingMetadata(_) => FailureKind::MissingMetadata,
            _ => return None,
        };
        Some(Self {
            step: step.to_string(),
            kind,
            message: err.to_string(),
        })
    }

    /// Reconstruct the error this failure was recorded from.
    pub fn to_error(&self) -> TrellisError {
        match self.kind {
            FailureKind::Validation => TrellisError::Validation(self.message.clone()),
            FailureKind::Execution => TrellisError::Execution(self.message.clone()),
            FailureKind::Parse => TrellisError::Parse(self.message.clone()),
            FailureKind::MissingMetadata => TrellisError::MissingMetadata(self.message.clone()),
        }
    }
}

/// Contract between a typed pipeline state and the executor.
///
/// Each pipeline defines its own state struct (inputs, derived artifacts,
/// control fields) and exposes only the failure slot to the engine. The
/// executor owns the state for the duration of a run; steps receive it by
/// value and return a new one, so a failed or cancelled step can never leave
/// it half-mutated.
pub trait FlowState: Clone + Send + 'static {
    /// Record a recoverable failure for the next router to act on.
    fn record_failure(&mut self, failure: StepFailure);

    /// The most recent unresolved failure, if any.
    fn last_failure(&self) -> Option<&StepFailure>;
}
