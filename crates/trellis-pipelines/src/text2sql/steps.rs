use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::{debug, info, warn};

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::{LlmClient, SchemaStore, SqlExecutor};
use trellis_core::types::QueryOutput;
use trellis_graph::{RetryPolicy, Step};
use trellis_llm::parse::{complete_json, complete_sql, PARSE_RETRIES};

use super::prompts;
use super::state::{SqlRunOutput, SqlTaskState};
use crate::support::require;

/// Note deposited in `result_note` when a query runs but returns no rows.
/// An empty result is a success, not a failure; the note travels into the
/// final output so the caller can tell "no data" from "never ran".
pub const EMPTY_RESULT_NOTE: &str = "query returned no rows";

const SAMPLE_ROWS: usize = 5;

/// Render a small sample of a query result for the review prompt.
fn result_sample(out: &QueryOutput) -> String {
    let mut sample = out.columns.join(", ");
    for row in out.rows.iter().take(SAMPLE_ROWS) {
        let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        sample.push('\n');
        sample.push_str(&cells.join(", "));
    }
    if out.rows.len() > SAMPLE_ROWS {
        sample.push_str(&format!("\n(+{} more rows)", out.rows.len() - SAMPLE_ROWS));
    }
    sample
}

/// Collects schema briefs for every table on the target connection.
pub struct SchemaStep {
    schemas: Arc<dyn SchemaStore>,
}

impl SchemaStep {
    pub fn new(schemas: Arc<dyn SchemaStore>) -> Self {
        Self { schemas }
    }
}

impl Step<SqlTaskState> for SchemaStep {
    fn name(&self) -> &str {
        "schema"
    }

    fn run(&self, mut state: SqlTaskState) -> BoxFuture<'_, Result<SqlTaskState>> {
        Box::pin(async move {
            let names = self.schemas.table_names().await?;
            if names.is_empty() {
                return Err(TrellisError::MissingMetadata(format!(
                    "connection '{}' exposes no tables",
                    state.connection
                )));
            }

            let mut briefs = Vec::with_capacity(names.len());
            let mut fk_lines = Vec::new();
            for name in &names {
                let schema = self
                    .schemas
                    .table_schema(name)
                    .await?
                    .ok_or_else(|| TrellisError::MissingMetadata(format!("table '{name}'")))?;
                briefs.push(schema.markdown());
                fk_lines.extend(schema.fk_lines());
            }

            debug!(tables = names.len(), "Collected schema briefs");
            state.schema_brief = Some(briefs.join("\n"));
            state.fk_brief = Some(if fk_lines.is_empty() {
                "none".to_string()
            } else {
                fk_lines.join("\n")
            });
            Ok(state)
        })
    }
}

/// Drafts the first SQL candidate from the question and schema brief.
pub struct DraftStep {
    llm: Arc<dyn LlmClient>,
}

impl DraftStep {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

impl Step<SqlTaskState> for DraftStep {
    fn name(&self) -> &str {
        "draft"
    }

    fn run(&self, mut state: SqlTaskState) -> BoxFuture<'_, Result<SqlTaskState>> {
        Box::pin(async move {
            let schema_brief = require(&state.schema_brief, "draft", "schema_brief")?;
            let fk_brief = require(&state.fk_brief, "draft", "fk_brief")?;

            let prompt = prompts::draft(
                &state.question,
                schema_brief,
                fk_brief,
                state.notes.as_deref(),
            );
            let sql = complete_sql(self.llm.as_ref(), &prompt).await?;

            info!(sql = %sql, "Drafted candidate SQL");
            state.candidate_sql = Some(sql);
            Ok(state)
        })
    }
}

/// Runs the candidate SQL against the target connection.
///
/// A recoverable execution error is gated against the attempt budget before
/// it leaves this step: within budget the error flows to the router (which
/// sends it to `repair`), past it the run halts with `BudgetExhausted`.
pub struct ExecuteStep {
    sql: Arc<dyn SqlExecutor>,
    policy: RetryPolicy,
}

impl ExecuteStep {
    pub fn new(sql: Arc<dyn SqlExecutor>, policy: RetryPolicy) -> Self {
        Self { sql, policy }
    }
}

impl Step<SqlTaskState> for ExecuteStep {
    fn name(&self) -> &str {
        "execute"
    }

    fn run(&self, mut state: SqlTaskState) -> BoxFuture<'_, Result<SqlTaskState>> {
        Box::pin(async move {
            let sql = require(&state.candidate_sql, "execute", "candidate_sql")?.clone();

            match self.sql.run_query(&state.connection, &sql).await {
                Ok(out) => {
                    info!(rows = out.rows.len(), "Query executed");
                    state.result_note = out.is_empty().then(|| EMPTY_RESULT_NOTE.to_string());
                    state.result = Some(out);
                    state.retry.succeed();
                    Ok(state)
                }
                Err(e) if e.is_recoverable() => {
                    warn!(attempts = state.retry.attempts, error = %e, "Query failed");
                    Err(state.retry.gate(&self.policy, e))
                }
                Err(e) => Err(e),
            }
        })
    }
}

/// Rewrites the candidate SQL from an execution error or reviewer feedback.
pub struct RepairStep {
    llm: Arc<dyn LlmClient>,
}

impl RepairStep {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

impl Step<SqlTaskState> for RepairStep {
    fn name(&self) -> &str {
        "repair"
    }

    fn run(&self, mut state: SqlTaskState) -> BoxFuture<'_, Result<SqlTaskState>> {
        Box::pin(async move {
            let schema_brief = require(&state.schema_brief, "repair", "schema_brief")?.clone();
            let fk_brief = require(&state.fk_brief, "repair", "fk_brief")?.clone();
            let sql = require(&state.candidate_sql, "repair", "candidate_sql")?.clone();

            // An execution failure takes priority; a reviewer rejection only
            // drives the repair when nothing failed on the way here.
            let prompt = if let Some(failure) = state.retry.last_failure.as_ref() {
                prompts::repair(&state.question, &schema_brief, &fk_brief, &sql, &failure.message)
            } else if let Some(feedback) = state.retry.review_feedback() {
                prompts::repair_with_feedback(
                    &state.question,
                    &schema_brief,
                    &fk_brief,
                    &sql,
                    feedback,
                )
            } else {
                return Err(TrellisError::MissingField {
                    step: "repair".to_string(),
                    field: "last_failure".to_string(),
                });
            };

            let fixed = complete_sql(self.llm.as_ref(), &prompt).await?;

            state.retry.begin_repair();
            state.retry.succeed();
            info!(attempts = state.retry.attempts, sql = %fixed, "Repaired candidate SQL");
            state.candidate_sql = Some(fixed);
            Ok(state)
        })
    }
}

#[derive(Debug, Deserialize)]
struct ReviewReply {
    accept: bool,
    #[serde(default)]
    reason: String,
}

/// Judges whether the executed result actually answers the question.
///
/// An accepted result sets `review_note` and passes the verdict. A rejection
/// opens a review restart if the policy still allows one; once the restart
/// budget is spent the result is kept as-is with the reviewer's objection
/// recorded in the note. A reply that never decodes into a verdict exhausts
/// the parse re-ask budget and is fatal.
pub struct ReviewStep {
    llm: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl ReviewStep {
    pub fn new(llm: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { llm, policy }
    }
}

impl Step<SqlTaskState> for ReviewStep {
    fn name(&self) -> &str {
        "review"
    }

    fn run(&self, mut state: SqlTaskState) -> BoxFuture<'_, Result<SqlTaskState>> {
        Box::pin(async move {
            let sql = require(&state.candidate_sql, "review", "candidate_sql")?;
            let result = require(&state.result, "review", "result")?;

            let prompt = prompts::review(&state.question, sql, &result_sample(result));
            let reply: ReviewReply = match complete_json(self.llm.as_ref(), &prompt).await {
                Ok(reply) => reply,
                // The re-asks inside complete_json are the only recovery for
                // an undecodable verdict; past them the run halts instead of
                // finalizing a result that was never reviewed.
                Err(e @ TrellisError::Parse(_)) => {
                    return Err(TrellisError::BudgetExhausted {
                        attempts: PARSE_RETRIES + 1,
                        source: Box::new(e),
                    })
                }
                Err(e) => return Err(e),
            };

            if reply.accept {
                info!(reason = %reply.reason, "Review accepted result");
                state.retry.pass_review();
                state.review_note = Some(reply.reason);
            } else if state.retry.reject_review(&self.policy, reply.reason.clone()) {
                warn!(reason = %reply.reason, "Review rejected result, restarting repair loop");
            } else {
                warn!(reason = %reply.reason, "Review rejected result, restart budget spent");
                state.review_note = Some(format!("{} (accepted as-is)", reply.reason));
            }
            Ok(state)
        })
    }
}

/// Packs the run's artifacts into the final output.
pub struct FinalizeStep;

impl Step<SqlTaskState> for FinalizeStep {
    fn name(&self) -> &str {
        "finalize"
    }

    fn run(&self, mut state: SqlTaskState) -> BoxFuture<'_, Result<SqlTaskState>> {
        Box::pin(async move {
            let (columns, rows) = state
                .result
                .as_ref()
                .map(|r| (r.columns.clone(), r.rows.clone()))
                .unwrap_or_default();

            state.output = Some(SqlRunOutput {
                question: state.question.clone(),
                sql: state.candidate_sql.clone(),
                columns,
                rows,
                error: state.retry.last_failure.as_ref().map(|f| f.message.clone()),
                review_note: state
                    .review_note
                    .clone()
                    .or_else(|| state.result_note.clone()),
            });
            Ok(state)
        })
    }
}
