//! Workflow instantiations over the graph engine: text-to-SQL with a
//! bounded self-repair loop, and causal analysis with a conditional entry
//! fork.

pub mod causal;
pub mod text2sql;

mod support;

pub use causal::{BaselineEngine, CausalPipeline, CausalQuery, CausalTaskState};
pub use text2sql::{SqlPipeline, SqlRunOutput, SqlTaskState};
