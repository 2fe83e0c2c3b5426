//! Causal-effect analysis over relational data: variable parsing, data
//! fetch with a bounded SQL-repair loop, preprocessing, strategy selection,
//! and estimation behind the `CausalEngine` seam.

pub mod engine;
mod graph;
mod preprocess;
mod prompts;
mod query;
mod state;
mod steps;

pub use engine::BaselineEngine;
pub use graph::CausalPipeline;
pub use query::CausalQuery;
pub use state::CausalTaskState;
