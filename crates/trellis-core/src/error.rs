use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrellisError {
    // Artifact errors — recoverable inside a retry loop
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Missing metadata for table: {0}")]
    MissingMetadata(String),

    // Wiring defects — always fatal
    #[error("Step '{step}' requires missing state field '{field}'")]
    MissingField { step: String, field: String },

    #[error("Graph error: {0}")]
    Graph(String),

    // Retry budget
    #[error("Retry budget exhausted after {attempts} attempts: {source}")]
    BudgetExhausted {
        attempts: u32,
        #[source]
        source: Box<TrellisError>,
    },

    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // Run lifecycle
    #[error("Run cancelled")]
    Cancelled,

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrellisError {
    /// Whether a retry loop may act on this error instead of aborting the run.
    ///
    /// Validation, execution, parse, and missing-metadata failures can all be
    /// repaired by regenerating the artifact. Wiring defects, exhausted
    /// budgets, and infrastructure errors cannot.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TrellisError::Validation(_)
                | TrellisError::Execution(_)
                | TrellisError::Parse(_)
                | TrellisError::MissingMetadata(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TrellisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(TrellisError::Validation("missing column".into()).is_recoverable());
        assert!(TrellisError::Execution("syntax error".into()).is_recoverable());
        assert!(TrellisError::Parse("bad json".into()).is_recoverable());
        assert!(TrellisError::MissingMetadata("orders".into()).is_recoverable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(!TrellisError::Graph("dangling edge".into()).is_recoverable());
        assert!(!TrellisError::MissingField {
            step: "fetch".into(),
            field: "sql_query".into(),
        }
        .is_recoverable());
        assert!(!TrellisError::Cancelled.is_recoverable());

        let exhausted = TrellisError::BudgetExhausted {
            attempts: 3,
            source: Box::new(TrellisError::Execution("still broken".into())),
        };
        assert!(!exhausted.is_recoverable());
    }

    #[test]
    fn test_budget_exhausted_carries_cause() {
        let err = TrellisError::BudgetExhausted {
            attempts: 3,
            source: Box::new(TrellisError::Execution("no such table: users".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("no such table"));
    }
}
