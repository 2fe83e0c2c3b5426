//! Workflow graph engine — ordered steps, conditional routing, and bounded
//! retry loops over a typed, run-scoped state.
//!
//! A workflow is a directed graph of `Step`s connected by unconditional
//! edges and `Router`-resolved conditional edges. The `Workflow` executor
//! walks the graph from an entry step, threading an owned state value
//! through each step until a terminal is reached or a fatal error halts the
//! run. Retry loops are ordinary cycles in the graph governed by the
//! `RetryState` budgets; the executor tracks per-step visit counts so
//! budgets stay observable.
//!
//! Graph wiring is validated at build time: every edge endpoint and every
//! declared router target must name a registered step (or `END`).

pub mod edge;
pub mod executor;
pub mod graph;
pub mod node;
pub mod retry;
pub mod state;

pub use edge::{Next, Router, END};
pub use executor::{RunReport, RunStatus};
pub use graph::{GraphBuilder, Workflow, DEFAULT_MAX_HOPS};
pub use node::{FnStep, Step};
pub use retry::{RetryPolicy, RetryState, ReviewVerdict};
pub use state::{FailureKind, FlowState, StepFailure};
