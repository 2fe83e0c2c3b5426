use futures::future::BoxFuture;

use trellis_core::Result;

use crate::state::FlowState;

/// A unit of work in a workflow graph.
///
/// Steps are stateless: all data flows through the state value. A step
/// consumes the state and returns a new one; the executor keeps the
/// pre-step state, so returning an error (or being cancelled mid-call)
/// leaves the run's state exactly as it was.
///
/// A step must check its preconditions rather than assume them — a missing
/// required field is a `TrellisError::MissingField` (fatal wiring defect,
/// never retried).
pub trait Step<S: FlowState>: Send + Sync + 'static {
    /// Unique name within the graph.
    fn name(&self) -> &str;

    /// Run the step, producing the next state.
    fn run(&self, state: S) -> BoxFuture<'_, Result<S>>;
}

/// Adapter turning an async closure into a `Step`.
pub struct FnStep<S> {
    name: String,
    #[allow(clippy::type_complexity)]
    f: Box<dyn Fn(S) -> BoxFuture<'static, Result<S>> + Send + Sync>,
}

impl<S: FlowState> FnStep<S> {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(S) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<S>> + Send + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(move |state| Box::pin(f(state))),
        }
    }
}

impl<S: FlowState> Step<S> for FnStep<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, state: S) -> BoxFuture<'_, Result<S>> {
        (self.f)(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StepFailure;

    #[derive(Debug, Clone, Default)]
    struct Counter {
        n: u32,
        failure: Option<StepFailure>,
    }

    impl FlowState for Counter {
        fn record_failure(&mut self, failure: StepFailure) {
            self.failure = Some(failure);
        }

        fn last_failure(&self) -> Option<&StepFailure> {
            self.failure.as_ref()
        }
    }

    #[tokio::test]
    async fn test_fn_step_runs() {
        let step = FnStep::new("bump", |mut s: Counter| async move {
            s.n += 1;
            Ok(s)
        });
        assert_eq!(step.name(), "bump");

        let out = step.run(Counter::default()).await.unwrap();
        assert_eq!(out.n, 1);
    }

    #[tokio::test]
    async fn test_fn_step_is_idempotent_over_equal_inputs() {
        let step = FnStep::new("bump", |mut s: Counter| async move {
            s.n += 1;
            Ok(s)
        });

        let a = step.run(Counter::default()).await.unwrap();
        let b = step.run(Counter::default()).await.unwrap();
        assert_eq!(a.n, b.n);
    }
}
