//! Natural-language question to SQL result, with a bounded self-repair loop
//! and a semantic review gate.

mod graph;
mod prompts;
mod state;
mod steps;

pub use graph::SqlPipeline;
pub use state::{SqlRunOutput, SqlTaskState};
pub use steps::EMPTY_RESULT_NOTE;
