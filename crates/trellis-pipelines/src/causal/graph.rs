use std::sync::Arc;

use trellis_core::error::Result;
use trellis_core::traits::{CausalEngine, LlmClient, SchemaStore, SqlExecutor};
use trellis_core::types::ConnectionId;
use trellis_graph::{FlowState, FnStep, GraphBuilder, Next, RetryPolicy, RunReport, Workflow, END};

use super::query::CausalQuery;
use super::state::CausalTaskState;
use super::steps::{
    AnswerStep, EstimateStep, FetchStep, FixSqlStep, GenerateStep, ParseStep, PreprocessStep,
    StrategyStep,
};

/// The causal-analysis workflow: parse variables and generate SQL (unless a
/// query was supplied up front), fetch and validate the data with a bounded
/// SQL-repair loop, preprocess, pick a strategy, estimate, answer.
pub struct CausalPipeline {
    llm: Arc<dyn LlmClient>,
    sql: Arc<dyn SqlExecutor>,
    schemas: Arc<dyn SchemaStore>,
    engine: Arc<dyn CausalEngine>,
    policy: RetryPolicy,
}

impl CausalPipeline {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        sql: Arc<dyn SqlExecutor>,
        schemas: Arc<dyn SchemaStore>,
        engine: Arc<dyn CausalEngine>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            llm,
            sql,
            schemas,
            engine,
            policy,
        }
    }

    /// Build the validated workflow graph.
    ///
    /// Wiring:
    /// ```text
    /// entry --(sql present)--> fetch
    ///      \--(no sql)-------> parse -> generate -> fetch
    /// fetch --(failure)--> fix_sql -> fetch
    ///      \--(success)--> preprocess -> strategy -> estimate -> answer -> END
    /// ```
    pub fn workflow(&self) -> Result<Workflow<CausalTaskState>> {
        // Passthrough entry: the fork below must only read the field, never
        // compute it.
        let entry = FnStep::new("entry", |s: CausalTaskState| async move { Ok(s) });

        GraphBuilder::new()
            .add_step(entry)
            .add_step(ParseStep::new(
                Arc::clone(&self.llm),
                Arc::clone(&self.schemas),
            ))
            .add_step(GenerateStep::new(Arc::clone(&self.llm)))
            .add_step(FetchStep::new(Arc::clone(&self.sql), self.policy))
            .add_step(FixSqlStep::new(
                Arc::clone(&self.llm),
                Arc::clone(&self.schemas),
            ))
            .add_step(PreprocessStep)
            .add_step(StrategyStep::new(Arc::clone(&self.llm)))
            .add_step(EstimateStep::new(Arc::clone(&self.engine)))
            .add_step(AnswerStep::new(Arc::clone(&self.llm)))
            .entry("entry")
            .add_router(
                "entry",
                |s: &CausalTaskState| {
                    if s.sql_query.is_some() {
                        Next::step("fetch")
                    } else {
                        Next::step("parse")
                    }
                },
                &["fetch", "parse"],
            )
            .add_edge("parse", "generate")
            .add_edge("generate", "fetch")
            .add_router(
                "fetch",
                |s: &CausalTaskState| {
                    if s.last_failure().is_some() {
                        Next::step("fix_sql")
                    } else {
                        Next::step("preprocess")
                    }
                },
                &["fix_sql", "preprocess"],
            )
            .add_edge("fix_sql", "fetch")
            .add_edge("preprocess", "strategy")
            .add_edge("strategy", "estimate")
            .add_edge("estimate", "answer")
            .add_edge("answer", END)
            .build()
    }

    /// Run one question end to end. A precomputed query (with its variable
    /// selection) bypasses the parse and generate steps entirely.
    pub async fn run(
        &self,
        question: impl Into<String>,
        connection: ConnectionId,
        precomputed: Option<(String, CausalQuery)>,
    ) -> Result<RunReport<CausalTaskState>> {
        let workflow = self.workflow()?;
        let mut state = CausalTaskState::new(question, connection);
        if let Some((sql, parsed)) = precomputed {
            state = state.with_sql(sql, parsed);
        }
        Ok(workflow.run(state).await)
    }
}
