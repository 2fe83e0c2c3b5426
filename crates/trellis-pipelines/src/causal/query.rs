use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use trellis_core::types::TableSchema;

/// Variable specification parsed from a causal question.
///
/// Variables may be qualified (`table.column`); only the base column name is
/// expected in fetched results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CausalQuery {
    pub treatment: String,
    pub outcome: String,
    #[serde(default)]
    pub confounders: Vec<String>,
    #[serde(default)]
    pub mediators: Vec<String>,
    #[serde(default)]
    pub instrumental_variables: Vec<String>,
    #[serde(default)]
    pub main_table: String,
    #[serde(default)]
    pub join_tables: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Base column name of a possibly table-qualified variable.
pub fn base_name(var: &str) -> &str {
    var.rsplit('.').next().unwrap_or(var)
}

impl CausalQuery {
    /// Column names (base form, deduplicated, order preserved) the fetched
    /// result must contain.
    pub fn expected_columns(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for var in std::iter::once(self.treatment.as_str())
            .chain(std::iter::once(self.outcome.as_str()))
            .chain(self.confounders.iter().map(String::as_str))
            .chain(self.mediators.iter().map(String::as_str))
            .chain(self.instrumental_variables.iter().map(String::as_str))
        {
            let base = base_name(var);
            if !base.is_empty() && seen.insert(base.to_string()) {
                out.push(base.to_string());
            }
        }
        out
    }

    /// Clean the adjustment sets and report problems the parser must fix.
    ///
    /// Dropped silently from confounders/mediators/instruments:
    /// identifier-like columns (`*_id` suffix or a primary key in any known
    /// table) and variables colliding with the treatment or outcome.
    /// Reported as issues (the caller re-asks the parser): an empty or
    /// identifier-like treatment/outcome, and variables naming no known
    /// column.
    pub fn sanitize(&mut self, schemas: &[TableSchema]) -> Vec<String> {
        let mut issues = Vec::new();

        let known: HashSet<&str> = schemas
            .iter()
            .flat_map(|t| t.columns.iter().map(|c| c.name.as_str()))
            .collect();
        let primary_keys: HashSet<&str> = schemas
            .iter()
            .flat_map(|t| t.primary_key_columns())
            .collect();
        let identifier_like =
            |name: &str| name.ends_with("_id") || name == "id" || primary_keys.contains(name);

        for (role, var) in [("treatment", &self.treatment), ("outcome", &self.outcome)] {
            let base = base_name(var);
            if base.is_empty() {
                issues.push(format!("{role} is empty"));
            } else if identifier_like(base) {
                issues.push(format!("{role} '{var}' is an identifier, not a measure"));
            } else if !known.is_empty() && !known.contains(base) {
                issues.push(format!("{role} '{var}' names no known column"));
            }
        }

        let treatment = base_name(&self.treatment).to_string();
        let outcome = base_name(&self.outcome).to_string();
        for vars in [
            &mut self.confounders,
            &mut self.mediators,
            &mut self.instrumental_variables,
        ] {
            vars.retain(|v| {
                let base = base_name(v);
                !identifier_like(base) && base != treatment && base != outcome
            });
            for v in vars.iter() {
                let base = base_name(v);
                if !known.is_empty() && !known.contains(base) {
                    issues.push(format!("variable '{v}' names no known column"));
                }
            }
        }

        issues
    }
}
