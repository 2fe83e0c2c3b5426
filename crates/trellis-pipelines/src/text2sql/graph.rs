use std::sync::Arc;

use trellis_core::error::Result;
use trellis_core::traits::{LlmClient, SchemaStore, SqlExecutor};
use trellis_core::types::ConnectionId;
use trellis_graph::{
    FlowState, GraphBuilder, Next, RetryPolicy, ReviewVerdict, RunReport, Workflow, END,
};

use super::state::SqlTaskState;
use super::steps::{DraftStep, ExecuteStep, FinalizeStep, RepairStep, ReviewStep, SchemaStep};

/// The text-to-SQL workflow: draft a query, execute it, repair on failure
/// within the attempt budget, review the result, finalize.
pub struct SqlPipeline {
    llm: Arc<dyn LlmClient>,
    sql: Arc<dyn SqlExecutor>,
    schemas: Arc<dyn SchemaStore>,
    policy: RetryPolicy,
}

impl SqlPipeline {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        sql: Arc<dyn SqlExecutor>,
        schemas: Arc<dyn SchemaStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            llm,
            sql,
            schemas,
            policy,
        }
    }

    /// Build the validated workflow graph.
    ///
    /// Wiring:
    /// ```text
    /// schema -> draft -> execute --(failure)--> repair -> execute
    ///                          \--(success)--> review --(reject)--> repair
    ///                                                \--(accept)--> finalize -> END
    /// ```
    pub fn workflow(&self) -> Result<Workflow<SqlTaskState>> {
        GraphBuilder::new()
            .add_step(SchemaStep::new(Arc::clone(&self.schemas)))
            .add_step(DraftStep::new(Arc::clone(&self.llm)))
            .add_step(ExecuteStep::new(Arc::clone(&self.sql), self.policy))
            .add_step(RepairStep::new(Arc::clone(&self.llm)))
            .add_step(ReviewStep::new(Arc::clone(&self.llm), self.policy))
            .add_step(FinalizeStep)
            .entry("schema")
            .add_edge("schema", "draft")
            .add_edge("draft", "execute")
            .add_router(
                "execute",
                |s: &SqlTaskState| {
                    if s.last_failure().is_some() {
                        Next::step("repair")
                    } else {
                        Next::step("review")
                    }
                },
                &["repair", "review"],
            )
            .add_edge("repair", "execute")
            .add_router(
                "review",
                |s: &SqlTaskState| {
                    // A rejection within the restart budget re-enters repair;
                    // anything else (accept, or rejection with the budget
                    // spent and the note already written) finalizes.
                    match &s.retry.verdict {
                        ReviewVerdict::Fail(_) if s.review_note.is_none() => Next::step("repair"),
                        _ => Next::step("finalize"),
                    }
                },
                &["repair", "finalize"],
            )
            .add_edge("finalize", END)
            .build()
    }

    /// Run one question end to end.
    pub async fn run(
        &self,
        question: impl Into<String>,
        connection: ConnectionId,
        notes: Option<String>,
    ) -> Result<RunReport<SqlTaskState>> {
        let workflow = self.workflow()?;
        let mut state = SqlTaskState::new(question, connection);
        if let Some(notes) = notes {
            state = state.with_notes(notes);
        }
        Ok(workflow.run(state).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use trellis_core::error::TrellisError;
    use trellis_core::types::{ColumnSchema, TableSchema};
    use trellis_llm::mock::MockLlm;
    use trellis_store::executor::SqliteExecutor;
    use trellis_store::metadata::SchemaCache;

    fn fixture_db() -> SqliteExecutor {
        let exec = SqliteExecutor::in_memory(ConnectionId::new("default")).unwrap();
        exec.execute_batch(
            "CREATE TABLE users (user_id INTEGER PRIMARY KEY, name TEXT, active INTEGER);
             INSERT INTO users VALUES (1, 'ada', 1), (2, 'bob', 0);",
        )
        .unwrap();
        exec
    }

    fn fixture_schemas() -> SchemaCache {
        SchemaCache::from_schemas(vec![TableSchema {
            name: "users".into(),
            columns: vec![
                ColumnSchema {
                    name: "user_id".into(),
                    dtype: "INTEGER".into(),
                    primary_key: true,
                },
                ColumnSchema {
                    name: "name".into(),
                    dtype: "TEXT".into(),
                    primary_key: false,
                },
                ColumnSchema {
                    name: "active".into(),
                    dtype: "INTEGER".into(),
                    primary_key: false,
                },
            ],
            foreign_keys: vec![],
        }])
    }

    fn pipeline(replies: Vec<&str>) -> SqlPipeline {
        SqlPipeline::new(
            Arc::new(MockLlm::replies(replies)),
            Arc::new(fixture_db()),
            Arc::new(fixture_schemas()),
            RetryPolicy::default(),
        )
    }

    #[test]
    fn test_workflow_wiring_is_valid() {
        let p = pipeline(vec![]);
        let wf = p.workflow().unwrap();
        assert_eq!(wf.entry_step(), "schema");
        assert_eq!(wf.step_names().len(), 6);
    }

    #[tokio::test]
    async fn test_clean_first_try_run() {
        let p = pipeline(vec![
            "```sql\nSELECT name FROM users WHERE active = 1\n```",
            r#"{"accept": true, "reason": "matches the question"}"#,
        ]);
        let report = p
            .run("who is active?", ConnectionId::new("default"), None)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.state.retry.attempts, 0);
        assert_eq!(report.visit_count("repair"), 0);
        let output = report.state.output.as_ref().unwrap();
        assert_eq!(output.rows, vec![vec![serde_json::json!("ada")]]);
    }

    #[tokio::test]
    async fn test_bad_sql_repaired_then_succeeds() {
        let p = pipeline(vec![
            "```sql\nSELECT nmae FROM users\n```",
            "```sql\nSELECT name FROM users\n```",
            r#"{"accept": true, "reason": "ok"}"#,
        ]);
        let report = p
            .run("list names", ConnectionId::new("default"), None)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.state.retry.attempts, 1);
        assert_eq!(report.visit_count("execute"), 2);
        assert_eq!(report.visit_count("repair"), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_fatal() {
        // Draft plus three repairs, all referencing a missing column.
        let bad = "```sql\nSELECT nmae FROM users\n```";
        let p = pipeline(vec![bad, bad, bad, bad]);
        let report = p
            .run("list names", ConnectionId::new("default"), None)
            .await
            .unwrap();

        assert!(!report.is_success());
        match report.error() {
            Some(TrellisError::BudgetExhausted { attempts, .. }) => assert_eq!(*attempts, 3),
            other => panic!("expected BudgetExhausted, got {other:?}"),
        }
        assert_eq!(report.visit_count("execute"), 4);
        assert_eq!(report.visit_count("finalize"), 0);
    }
}
