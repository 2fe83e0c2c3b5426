use serde::{Deserialize, Serialize};

use trellis_core::TrellisError;

use crate::state::StepFailure;

/// Budgets for a generate/validate/repair/review loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Repair cycles allowed before the loop escalates to fatal.
    pub max_attempts: u32,
    /// Review-triggered restarts allowed (each resets `attempts` to 0).
    pub max_review_restarts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_review_restarts: 1,
        }
    }
}

/// Verdict of the semantic review step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    /// Not yet evaluated.
    #[default]
    Pending,
    Pass,
    /// Rejected with the reviewer's reason.
    Fail(String),
}

/// Control fields of a retry loop, embedded in a pipeline's state.
///
/// `attempts` counts repair cycles and never exceeds the policy's
/// `max_attempts`: the validating step passes a recoverable error through
/// `gate` before returning it, and the repair step calls `begin_repair`
/// once per cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryState {
    pub attempts: u32,
    pub review_restarts: u32,
    pub verdict: ReviewVerdict,
    pub last_failure: Option<StepFailure>,
}

impl RetryState {
    /// Gate a recoverable failure against the attempt budget.
    ///
    /// With budget remaining, hands the error back unchanged for the router
    /// to send to repair. With the budget spent, converts it into the fatal
    /// `BudgetExhausted`, wrapping the failure as its cause.
    pub fn gate(&self, policy: &RetryPolicy, err: TrellisError) -> TrellisError {
        if self.attempts >= policy.max_attempts {
            return TrellisError::BudgetExhausted {
                attempts: self.attempts,
                source: Box::new(err),
            };
        }
        err
    }

    /// Start a repair cycle: consumes one attempt.
    pub fn begin_repair(&mut self) {
        self.attempts += 1;
    }

    /// Validation succeeded: clear the failure slot.
    pub fn succeed(&mut self) {
        self.last_failure = None;
    }

    /// The reviewer rejected an executed artifact.
    ///
    /// Returns `true` if a restart is allowed: the verdict carries the
    /// reason, `attempts` resets to 0 (a semantic rejection opens a fresh
    /// repair cycle), and one restart is consumed. Returns `false` once the
    /// restart budget is spent — the caller then terminates instead of
    /// oscillating between reviewer and repairer forever.
    pub fn reject_review(&mut self, policy: &RetryPolicy, reason: impl Into<String>) -> bool {
        if self.review_restarts >= policy.max_review_restarts {
            return false;
        }
        self.review_restarts += 1;
        self.attempts = 0;
        self.verdict = ReviewVerdict::Fail(reason.into());
        true
    }

    /// The reviewer accepted the artifact.
    pub fn pass_review(&mut self) {
        self.verdict = ReviewVerdict::Pass;
    }

    /// Whether the current pass through the loop is repairing a reviewer
    /// rejection (as opposed to an execution/validation failure).
    pub fn review_feedback(&self) -> Option<&str> {
        match &self.verdict {
            ReviewVerdict::Fail(reason) => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FailureKind;

    fn exec_err() -> TrellisError {
        TrellisError::Execution("syntax error near SELECT".into())
    }

    #[test]
    fn test_budget_allows_repairs_up_to_max() {
        let policy = RetryPolicy::default();
        let mut retry = RetryState::default();

        for expected in 1..=policy.max_attempts {
            let err = retry.gate(&policy, exec_err());
            assert!(err.is_recoverable());
            retry.begin_repair();
            assert_eq!(retry.attempts, expected);
        }

        // Fourth failure: budget spent, escalates.
        let err = retry.gate(&policy, exec_err());
        match err {
            TrellisError::BudgetExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, TrellisError::Execution(_)));
            }
            other => panic!("expected BudgetExhausted, got {other}"),
        }
        // Never exceeds the budget.
        assert_eq!(retry.attempts, policy.max_attempts);
    }

    #[test]
    fn test_succeed_clears_failure() {
        let mut retry = RetryState {
            last_failure: Some(StepFailure {
                step: "execute".into(),
                kind: FailureKind::Execution,
                message: "boom".into(),
            }),
            ..Default::default()
        };
        retry.succeed();
        assert!(retry.last_failure.is_none());
    }

    #[test]
    fn test_review_restart_resets_attempts_once() {
        let policy = RetryPolicy::default();
        let mut retry = RetryState {
            attempts: 2,
            ..Default::default()
        };

        assert!(retry.reject_review(&policy, "result is empty"));
        assert_eq!(retry.attempts, 0);
        assert_eq!(retry.review_restarts, 1);
        assert_eq!(retry.review_feedback(), Some("result is empty"));

        // Second rejection: restart budget spent.
        retry.attempts = 1;
        assert!(!retry.reject_review(&policy, "still empty"));
        assert_eq!(retry.review_restarts, 1);
        assert_eq!(retry.attempts, 1);
    }

    #[test]
    fn test_pass_review() {
        let mut retry = RetryState::default();
        retry.pass_review();
        assert_eq!(retry.verdict, ReviewVerdict::Pass);
        assert!(retry.review_feedback().is_none());
    }
}
