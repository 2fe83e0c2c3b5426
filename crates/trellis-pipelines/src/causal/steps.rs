use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::{CausalEngine, LlmClient, SchemaStore, SqlExecutor};
use trellis_core::types::{EstimateRequest, NumericFrame, Strategy, TableSchema};
use trellis_graph::{RetryPolicy, Step};
use trellis_llm::parse::{complete_json, complete_sql};

use super::preprocess::build_frame;
use super::prompts;
use super::query::CausalQuery;
use super::state::CausalTaskState;
use crate::support::require;

/// How many times an unusable variable selection is re-asked with the issue
/// list appended before the parse step gives up.
const SANITIZE_RETRIES: u32 = 2;

const SAMPLE_ROWS: usize = 3;

async fn load_schemas(store: &dyn SchemaStore) -> Result<Vec<TableSchema>> {
    let names = store.table_names().await?;
    let mut schemas = Vec::with_capacity(names.len());
    for name in &names {
        if let Some(schema) = store.table_schema(name).await? {
            schemas.push(schema);
        }
    }
    Ok(schemas)
}

fn brief(schemas: &[TableSchema]) -> String {
    let tables: Vec<String> = schemas.iter().map(|s| s.markdown()).collect();
    let fks: Vec<String> = schemas.iter().flat_map(|s| s.fk_lines()).collect();
    if fks.is_empty() {
        tables.join("\n")
    } else {
        format!("{}\nForeign keys:\n{}", tables.join("\n"), fks.join("\n"))
    }
}

fn frame_sample(frame: &NumericFrame) -> String {
    let mut out = frame.columns.join(", ");
    for row in frame.rows.iter().take(SAMPLE_ROWS) {
        let cells: Vec<String> = row.iter().map(|v| format!("{v:.3}")).collect();
        out.push('\n');
        out.push_str(&cells.join(", "));
    }
    out
}

/// Parses the question into a causal variable selection.
///
/// Selections that sanitize to issues (identifier treatments, unknown
/// columns) are re-asked with the issue list; a selection still unusable
/// after the re-ask budget is a validation failure.
pub struct ParseStep {
    llm: Arc<dyn LlmClient>,
    schemas: Arc<dyn SchemaStore>,
}

impl ParseStep {
    pub fn new(llm: Arc<dyn LlmClient>, schemas: Arc<dyn SchemaStore>) -> Self {
        Self { llm, schemas }
    }
}

impl Step<CausalTaskState> for ParseStep {
    fn name(&self) -> &str {
        "parse"
    }

    fn run(&self, mut state: CausalTaskState) -> BoxFuture<'_, Result<CausalTaskState>> {
        Box::pin(async move {
            let schemas = load_schemas(self.schemas.as_ref()).await?;
            let schema_brief = brief(&schemas);

            let mut prompt = prompts::parse(&state.question, &schema_brief);
            let mut last_issues = Vec::new();
            for attempt in 0..=SANITIZE_RETRIES {
                let mut parsed: CausalQuery =
                    complete_json(self.llm.as_ref(), &prompt).await?;
                let issues = parsed.sanitize(&schemas);
                if issues.is_empty() {
                    info!(
                        treatment = %parsed.treatment,
                        outcome = %parsed.outcome,
                        confounders = parsed.confounders.len(),
                        "Parsed causal variables"
                    );
                    state.schema_brief = Some(schema_brief);
                    state.parsed = Some(parsed);
                    return Ok(state);
                }
                warn!(attempt, issues = issues.len(), "Variable selection unusable, re-asking");
                prompt = prompts::parse_with_issues(&state.question, &schema_brief, &issues);
                last_issues = issues;
            }

            Err(TrellisError::Validation(format!(
                "causal variables unusable: {}",
                last_issues.join("; ")
            )))
        })
    }
}

/// Writes the SQL that materializes every causal variable as a column.
pub struct GenerateStep {
    llm: Arc<dyn LlmClient>,
}

impl GenerateStep {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

impl Step<CausalTaskState> for GenerateStep {
    fn name(&self) -> &str {
        "generate"
    }

    fn run(&self, mut state: CausalTaskState) -> BoxFuture<'_, Result<CausalTaskState>> {
        Box::pin(async move {
            let parsed = require(&state.parsed, "generate", "parsed")?;
            let schema_brief = require(&state.schema_brief, "generate", "schema_brief")?;

            let prompt = prompts::generate(parsed, schema_brief);
            let sql = complete_sql(self.llm.as_ref(), &prompt).await?;

            info!(sql = %sql, "Generated fetch SQL");
            state.sql_query = Some(sql);
            Ok(state)
        })
    }
}

/// Executes the fetch SQL and checks the result is structurally usable:
/// every expected causal column must be present when a variable selection
/// exists. Failures are gated against the attempt budget.
pub struct FetchStep {
    sql: Arc<dyn SqlExecutor>,
    policy: RetryPolicy,
}

impl FetchStep {
    pub fn new(sql: Arc<dyn SqlExecutor>, policy: RetryPolicy) -> Self {
        Self { sql, policy }
    }
}

impl Step<CausalTaskState> for FetchStep {
    fn name(&self) -> &str {
        "fetch"
    }

    fn run(&self, mut state: CausalTaskState) -> BoxFuture<'_, Result<CausalTaskState>> {
        Box::pin(async move {
            let sql = require(&state.sql_query, "fetch", "sql_query")?.clone();

            let out = match self.sql.run_query(&state.connection, &sql).await {
                Ok(out) => out,
                Err(e) if e.is_recoverable() => {
                    warn!(attempts = state.retry.attempts, error = %e, "Fetch query failed");
                    return Err(state.retry.gate(&self.policy, e));
                }
                Err(e) => return Err(e),
            };

            if let Some(parsed) = &state.parsed {
                let expected = parsed.expected_columns();
                let missing = out.missing_columns(&expected);
                if !missing.is_empty() {
                    let err = TrellisError::Validation(format!(
                        "fetched result is missing causal columns: {}",
                        missing.join(", ")
                    ));
                    warn!(attempts = state.retry.attempts, error = %err, "Fetch result unusable");
                    return Err(state.retry.gate(&self.policy, err));
                }
            }

            info!(rows = out.rows.len(), cols = out.columns.len(), "Fetched analysis data");
            state.result = Some(out);
            state.retry.succeed();
            Ok(state)
        })
    }
}

/// Rewrites the fetch SQL from the recorded failure.
pub struct FixSqlStep {
    llm: Arc<dyn LlmClient>,
    schemas: Arc<dyn SchemaStore>,
}

impl FixSqlStep {
    pub fn new(llm: Arc<dyn LlmClient>, schemas: Arc<dyn SchemaStore>) -> Self {
        Self { llm, schemas }
    }
}

impl Step<CausalTaskState> for FixSqlStep {
    fn name(&self) -> &str {
        "fix_sql"
    }

    fn run(&self, mut state: CausalTaskState) -> BoxFuture<'_, Result<CausalTaskState>> {
        Box::pin(async move {
            let parsed = require(&state.parsed, "fix_sql", "parsed")?.clone();
            let sql = require(&state.sql_query, "fix_sql", "sql_query")?.clone();
            let failure = state
                .retry
                .last_failure
                .clone()
                .ok_or_else(|| TrellisError::MissingField {
                    step: "fix_sql".to_string(),
                    field: "last_failure".to_string(),
                })?;

            // Precomputed-SQL runs skip parse, so the brief may not exist yet.
            let schema_brief = match &state.schema_brief {
                Some(b) => b.clone(),
                None => brief(&load_schemas(self.schemas.as_ref()).await?),
            };

            let prompt = prompts::fix_sql(&parsed, &schema_brief, &sql, &failure.message);
            let fixed = complete_sql(self.llm.as_ref(), &prompt).await?;

            state.retry.begin_repair();
            state.retry.succeed();
            info!(attempts = state.retry.attempts, sql = %fixed, "Repaired fetch SQL");
            state.schema_brief = Some(schema_brief);
            state.sql_query = Some(fixed);
            Ok(state)
        })
    }
}

/// Builds the numeric frame for estimation.
pub struct PreprocessStep;

impl Step<CausalTaskState> for PreprocessStep {
    fn name(&self) -> &str {
        "preprocess"
    }

    fn run(&self, mut state: CausalTaskState) -> BoxFuture<'_, Result<CausalTaskState>> {
        Box::pin(async move {
            let result = require(&state.result, "preprocess", "result")?;
            let frame = build_frame(result, state.parsed.as_ref())?;
            debug!(rows = frame.len(), cols = frame.columns.len(), "Frame ready");
            state.frame = Some(frame);
            Ok(state)
        })
    }
}

/// Asks the model to pick task, identification, estimator, and refuter.
pub struct StrategyStep {
    llm: Arc<dyn LlmClient>,
}

impl StrategyStep {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

impl Step<CausalTaskState> for StrategyStep {
    fn name(&self) -> &str {
        "strategy"
    }

    fn run(&self, mut state: CausalTaskState) -> BoxFuture<'_, Result<CausalTaskState>> {
        Box::pin(async move {
            let parsed = require(&state.parsed, "strategy", "parsed")?;
            let frame = require(&state.frame, "strategy", "frame")?;

            let prompt = prompts::strategy(parsed, &frame.columns, &frame_sample(frame));
            let strategy: Strategy = complete_json(self.llm.as_ref(), &prompt).await?;

            info!(
                task = %strategy.task,
                identification = %strategy.identification,
                estimator = %strategy.estimator,
                "Strategy selected"
            );
            state.strategy = Some(strategy);
            Ok(state)
        })
    }
}

/// Hands frame, variables, and strategy to the causal engine.
pub struct EstimateStep {
    engine: Arc<dyn CausalEngine>,
}

impl EstimateStep {
    pub fn new(engine: Arc<dyn CausalEngine>) -> Self {
        Self { engine }
    }
}

impl Step<CausalTaskState> for EstimateStep {
    fn name(&self) -> &str {
        "estimate"
    }

    fn run(&self, mut state: CausalTaskState) -> BoxFuture<'_, Result<CausalTaskState>> {
        Box::pin(async move {
            let parsed = require(&state.parsed, "estimate", "parsed")?;
            let frame = require(&state.frame, "estimate", "frame")?;
            let strategy = require(&state.strategy, "estimate", "strategy")?;

            let request = EstimateRequest {
                frame: frame.clone(),
                treatment: parsed.treatment.clone(),
                outcome: parsed.outcome.clone(),
                confounders: parsed.confounders.clone(),
                strategy: strategy.clone(),
            };
            let estimate = self.engine.estimate(request).await?;

            info!(value = estimate.value, n = estimate.sample_size, "Effect estimated");
            state.estimate = Some(estimate);
            Ok(state)
        })
    }
}

/// Renders the estimate as a natural-language answer.
pub struct AnswerStep {
    llm: Arc<dyn LlmClient>,
}

impl AnswerStep {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

impl Step<CausalTaskState> for AnswerStep {
    fn name(&self) -> &str {
        "answer"
    }

    fn run(&self, mut state: CausalTaskState) -> BoxFuture<'_, Result<CausalTaskState>> {
        Box::pin(async move {
            let parsed = require(&state.parsed, "answer", "parsed")?;
            let strategy = require(&state.strategy, "answer", "strategy")?;
            let estimate = require(&state.estimate, "answer", "estimate")?;

            let prompt = prompts::answer(&state.question, parsed, strategy, estimate);
            let answer = self.llm.complete(&prompt).await?;

            state.answer = Some(answer.trim().to_string());
            Ok(state)
        })
    }
}
