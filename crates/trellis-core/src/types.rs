use serde::{Deserialize, Serialize};

/// Identifier of a target database connection.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of running a SQL query: column names plus rows of JSON values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryOutput {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Column names missing from this result, given a list of expected names.
    pub fn missing_columns<'a>(&self, expected: &'a [String]) -> Vec<&'a str> {
        expected
            .iter()
            .filter(|c| self.column_index(c).is_none())
            .map(|c| c.as_str())
            .collect()
    }
}

/// A single column in a table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub dtype: String,
    #[serde(default)]
    pub primary_key: bool,
}

/// A foreign-key relationship from one column to another table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

/// Schema metadata for one table, as served by a `SchemaStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    /// Render this schema as a markdown brief for prompt construction.
    pub fn markdown(&self) -> String {
        let mut out = format!("# Table: {}\n", self.name);
        for col in &self.columns {
            if col.primary_key {
                out.push_str(&format!("- {} ({}), PK\n", col.name, col.dtype));
            } else {
                out.push_str(&format!("- {} ({})\n", col.name, col.dtype));
            }
        }
        out
    }

    /// Join conditions for this table's foreign keys, one per line.
    pub fn fk_lines(&self) -> Vec<String> {
        self.foreign_keys
            .iter()
            .map(|fk| {
                format!(
                    "{}.\"{}\" = {}.\"{}\"",
                    self.name, fk.column, fk.ref_table, fk.ref_column
                )
            })
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// A purely numeric table handed to the causal engine.
///
/// Row-major; every value has already been coerced to f64 by preprocessing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NumericFrame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl NumericFrame {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx]).collect())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Causal strategy selected for an analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    /// e.g. "ate" or "att"
    pub task: String,
    /// e.g. "backdoor", "iv", "mediation"
    pub identification: String,
    /// e.g. "backdoor.linear_regression"
    pub estimator: String,
    #[serde(default)]
    pub refuter: Option<String>,
}

/// Request handed to the `CausalEngine` collaborator.
#[derive(Debug, Clone)]
pub struct EstimateRequest {
    pub frame: NumericFrame,
    pub treatment: String,
    pub outcome: String,
    pub confounders: Vec<String>,
    pub strategy: Strategy,
}

/// Effect estimate returned by the `CausalEngine`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalEstimate {
    pub value: f64,
    pub estimator: String,
    #[serde(default)]
    pub sample_size: usize,
    #[serde(default)]
    pub refutation: Option<String>,
}
