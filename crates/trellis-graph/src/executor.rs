use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use trellis_core::TrellisError;

use crate::edge::{Next, END};
use crate::graph::Workflow;
use crate::state::{FlowState, StepFailure};

/// How a run ended.
#[derive(Debug)]
pub enum RunStatus {
    /// A terminal was reached; the final state is complete.
    Success,
    /// A fatal error halted the run; the state is partial.
    Fatal(TrellisError),
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Success)
    }
}

/// Outcome of one workflow run: final (or partial) state plus diagnostics.
#[derive(Debug)]
pub struct RunReport<S> {
    pub state: S,
    pub status: RunStatus,
    /// How many times each step executed during this run.
    pub visits: HashMap<String, usize>,
    /// Total step invocations.
    pub hops: usize,
    pub elapsed_ms: u64,
}

impl<S> RunReport<S> {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Visit count for a step (0 if it never ran).
    pub fn visit_count(&self, step: &str) -> usize {
        self.visits.get(step).copied().unwrap_or(0)
    }

    /// The fatal error, if the run failed.
    pub fn error(&self) -> Option<&TrellisError> {
        match &self.status {
            RunStatus::Fatal(e) => Some(e),
            RunStatus::Success => None,
        }
    }
}

impl<S: FlowState> Workflow<S> {
    /// Execute the workflow from its entry step.
    ///
    /// Each run owns its state exclusively; concurrent runs of the same
    /// `Workflow` never share anything mutable. Steps receive a clone of the
    /// current state, so a step that errors (or is cancelled at an await
    /// point) leaves the run's state untouched.
    ///
    /// Recoverable step errors are deposited into the state and handed to
    /// the step's router; if the failing step has no router, nothing
    /// downstream could act on the failure, so it escalates to fatal.
    /// Fatal errors halt immediately with the partial state attached.
    pub async fn run(&self, initial: S) -> RunReport<S> {
        let start = Instant::now();
        let mut state = initial;
        let mut visits: HashMap<String, usize> = HashMap::new();
        let mut current = self.entry.clone();
        let mut hops = 0usize;

        let status = loop {
            if hops >= self.max_hops {
                error!(step = %current, hops, "Hop cap reached, aborting run");
                break RunStatus::Fatal(TrellisError::Graph(format!(
                    "hop cap ({}) reached at step '{}'; unbounded cycle suspected",
                    self.max_hops, current
                )));
            }

            let step = match self.steps.get(&current) {
                Some(s) => s,
                None => {
                    // Unreachable after build() validation; kept as a hard stop.
                    break RunStatus::Fatal(TrellisError::Graph(format!(
                        "step '{}' not found in graph",
                        current
                    )));
                }
            };

            hops += 1;
            *visits.entry(current.clone()).or_insert(0) += 1;
            debug!(step = %current, hop = hops, "Executing step");

            match step.run(state.clone()).await {
                Ok(next_state) => {
                    state = next_state;
                }
                Err(e) if e.is_recoverable() => {
                    if !self.routers.contains_key(&current) {
                        // No router follows — the failure would sit in state
                        // with nothing to act on it.
                        error!(step = %current, error = %e, "Recoverable failure with no router, escalating");
                        break RunStatus::Fatal(e);
                    }
                    // from_error is Some for every recoverable error.
                    if let Some(failure) = StepFailure::from_error(&current, &e) {
                        warn!(step = %current, kind = ?failure.kind, error = %e, "Step failed, deferring to router");
                        state.record_failure(failure);
                    }
                }
                Err(e) => {
                    error!(step = %current, error = %e, "Fatal step error, halting run");
                    break RunStatus::Fatal(e);
                }
            }

            // Route: conditional edge if present, else static edge, else done.
            if let Some(cond) = self.routers.get(&current) {
                match (cond.router)(&state) {
                    Next::End => break RunStatus::Success,
                    Next::Step(target) => {
                        if target == END {
                            break RunStatus::Success;
                        }
                        if !cond.declares(&target) {
                            break RunStatus::Fatal(TrellisError::Graph(format!(
                                "router after '{}' returned undeclared target '{}'",
                                current, target
                            )));
                        }
                        debug!(from = %current, to = %target, "Routed");
                        current = target;
                    }
                }
            } else if let Some(to) = self.edges.get(&current) {
                if to == END {
                    break RunStatus::Success;
                }
                current = to.clone();
            } else {
                debug!(step = %current, "No outgoing edge, run complete");
                break RunStatus::Success;
            }
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            success = status.is_success(),
            hops, elapsed_ms, "Run finished"
        );

        RunReport {
            state,
            status,
            visits,
            hops,
            elapsed_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::node::FnStep;
    use crate::state::FailureKind;

    #[derive(Debug, Clone, Default)]
    struct TestState {
        trace: Vec<&'static str>,
        fail_next: u32,
        failure: Option<StepFailure>,
    }

    impl FlowState for TestState {
        fn record_failure(&mut self, failure: StepFailure) {
            self.failure = Some(failure);
        }

        fn last_failure(&self) -> Option<&StepFailure> {
            self.failure.as_ref()
        }
    }

    fn tracer(name: &'static str) -> FnStep<TestState> {
        FnStep::new(name, move |mut s: TestState| async move {
            s.trace.push(name);
            Ok(s)
        })
    }

    #[tokio::test]
    async fn test_linear_run() {
        let wf = GraphBuilder::new()
            .add_step(tracer("a"))
            .add_step(tracer("b"))
            .add_step(tracer("c"))
            .add_edge("a", "b")
            .add_edge("b", "c")
            .add_edge("c", END)
            .entry("a")
            .build()
            .unwrap();

        let report = wf.run(TestState::default()).await;
        assert!(report.is_success());
        assert_eq!(report.state.trace, vec!["a", "b", "c"]);
        assert_eq!(report.hops, 3);
        assert_eq!(report.visit_count("b"), 1);
    }

    #[tokio::test]
    async fn test_terminal_without_edge() {
        let wf = GraphBuilder::new()
            .add_step(tracer("only"))
            .entry("only")
            .build()
            .unwrap();

        let report = wf.run(TestState::default()).await;
        assert!(report.is_success());
        assert_eq!(report.state.trace, vec!["only"]);
    }

    #[tokio::test]
    async fn test_router_branching() {
        let wf = GraphBuilder::new()
            .add_step(tracer("decide"))
            .add_step(tracer("left"))
            .add_step(tracer("right"))
            .add_router(
                "decide",
                |s: &TestState| {
                    if s.fail_next > 0 {
                        Next::step("left")
                    } else {
                        Next::step("right")
                    }
                },
                &["left", "right"],
            )
            .add_edge("left", END)
            .add_edge("right", END)
            .entry("decide")
            .build()
            .unwrap();

        let report = wf
            .run(TestState {
                fail_next: 1,
                ..Default::default()
            })
            .await;
        assert_eq!(report.state.trace, vec!["decide", "left"]);

        let report = wf.run(TestState::default()).await;
        assert_eq!(report.state.trace, vec!["decide", "right"]);
    }

    #[tokio::test]
    async fn test_recoverable_failure_deposited_and_routed() {
        let failing = FnStep::new("work", |mut s: TestState| async move {
            if s.fail_next > 0 {
                s.fail_next -= 1; // lost: executor keeps the pre-step state
                return Err(TrellisError::Execution("boom".into()));
            }
            s.trace.push("work");
            Ok(s)
        });

        let wf = GraphBuilder::new()
            .add_step(failing)
            .add_step(tracer("recover"))
            .add_router(
                "work",
                |s: &TestState| {
                    if s.last_failure().is_some() {
                        Next::step("recover")
                    } else {
                        Next::End
                    }
                },
                &["recover", END],
            )
            .add_edge("recover", END)
            .entry("work")
            .build()
            .unwrap();

        let report = wf
            .run(TestState {
                fail_next: 1,
                ..Default::default()
            })
            .await;
        assert!(report.is_success());
        assert_eq!(report.state.trace, vec!["recover"]);
        let failure = report.state.failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::Execution);
        assert_eq!(failure.step, "work");
        // Pre-step state preserved: the step's own decrement was discarded.
        assert_eq!(report.state.fail_next, 1);
    }

    #[tokio::test]
    async fn test_recoverable_failure_without_router_is_fatal() {
        let failing = FnStep::new("work", |_s: TestState| async move {
            Err(TrellisError::Execution("boom".into()))
        });

        let wf = GraphBuilder::new()
            .add_step(failing)
            .add_step(tracer("after"))
            .add_edge("work", "after")
            .add_edge("after", END)
            .entry("work")
            .build()
            .unwrap();

        let report = wf.run(TestState::default()).await;
        assert!(!report.is_success());
        assert!(matches!(report.error(), Some(TrellisError::Execution(_))));
        assert_eq!(report.visit_count("after"), 0);
    }

    #[tokio::test]
    async fn test_fatal_error_halts_with_partial_state() {
        let fatal = FnStep::new("explode", |mut s: TestState| async move {
            s.trace.push("explode");
            let _ = s;
            Err(TrellisError::MissingField {
                step: "explode".into(),
                field: "question".into(),
            })
        });

        let wf = GraphBuilder::new()
            .add_step(tracer("a"))
            .add_step(fatal)
            .add_step(tracer("never"))
            .add_edge("a", "explode")
            .add_edge("explode", "never")
            .add_edge("never", END)
            .entry("a")
            .build()
            .unwrap();

        let report = wf.run(TestState::default()).await;
        assert!(!report.is_success());
        // Partial state from before the failing step.
        assert_eq!(report.state.trace, vec!["a"]);
        assert_eq!(report.visit_count("never"), 0);
        assert!(matches!(
            report.error(),
            Some(TrellisError::MissingField { .. })
        ));
    }

    #[tokio::test]
    async fn test_cycle_revisits_are_counted() {
        // spin loops back to itself until fail_next drains: one visit per
        // decrement, so seeding 3 yields exactly 3 executions.
        let spin = FnStep::new("spin", |mut s: TestState| async move {
            if s.fail_next > 0 {
                s.fail_next -= 1;
            }
            Ok(s)
        });

        let wf = GraphBuilder::new()
            .add_step(spin)
            .add_router(
                "spin",
                |s: &TestState| {
                    if s.fail_next > 0 {
                        Next::step("spin")
                    } else {
                        Next::End
                    }
                },
                &["spin", END],
            )
            .entry("spin")
            .build()
            .unwrap();

        let report = wf
            .run(TestState {
                fail_next: 3,
                ..Default::default()
            })
            .await;
        assert!(report.is_success());
        assert_eq!(report.visit_count("spin"), 3);
    }

    #[tokio::test]
    async fn test_hop_cap_stops_unbounded_cycle() {
        let wf = GraphBuilder::new()
            .add_step(tracer("loop"))
            .add_router("loop", |_s: &TestState| Next::step("loop"), &["loop"])
            .entry("loop")
            .max_hops(10)
            .build()
            .unwrap();

        let report = wf.run(TestState::default()).await;
        assert!(!report.is_success());
        assert_eq!(report.hops, 10);
        assert!(report.error().unwrap().to_string().contains("hop cap"));
    }

    #[tokio::test]
    async fn test_undeclared_runtime_target_is_fatal() {
        let wf = GraphBuilder::new()
            .add_step(tracer("a"))
            .add_step(tracer("b"))
            .add_step(tracer("c"))
            // Declares only b, returns c.
            .add_router("a", |_s: &TestState| Next::step("c"), &["b"])
            .add_edge("b", END)
            .add_edge("c", END)
            .entry("a")
            .build()
            .unwrap();

        let report = wf.run(TestState::default()).await;
        assert!(!report.is_success());
        assert!(report
            .error()
            .unwrap()
            .to_string()
            .contains("undeclared target 'c'"));
    }

    #[tokio::test]
    async fn test_determinism_same_input_same_report() {
        let wf = GraphBuilder::new()
            .add_step(tracer("a"))
            .add_step(tracer("b"))
            .add_edge("a", "b")
            .add_edge("b", END)
            .entry("a")
            .build()
            .unwrap();

        let r1 = wf.run(TestState::default()).await;
        let r2 = wf.run(TestState::default()).await;
        assert_eq!(r1.state.trace, r2.state.trace);
        assert_eq!(r1.hops, r2.hops);
        assert_eq!(r1.visits, r2.visits);
    }
}
