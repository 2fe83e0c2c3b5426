//! Turn a raw query result into the purely numeric frame the causal engine
//! consumes: column selection, numeric coercion, categorical coding, null
//! dropping, and z-scoring of adjustment variables.

use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use trellis_core::error::{Result, TrellisError};
use trellis_core::types::{NumericFrame, QueryOutput};

use super::query::{base_name, CausalQuery};

/// Build the numeric frame for estimation.
///
/// Columns are the causal variables when a spec of them is present, all
/// result columns otherwise. A column where every non-null value reads as a
/// number is coerced directly; any other column is treated as categorical
/// and coded by the sorted order of its distinct values, so coding is
/// deterministic for a given result. Rows with a null in any selected column
/// are dropped; an empty frame afterwards means the data cannot support an
/// estimate at all, which no retry can fix.
///
/// Adjustment columns are z-scored; the treatment and outcome keep their
/// raw scale so the effect estimate stays interpretable.
pub fn build_frame(result: &QueryOutput, query: Option<&CausalQuery>) -> Result<NumericFrame> {
    let columns: Vec<String> = match query {
        Some(q) => q
            .expected_columns()
            .into_iter()
            .filter(|c| result.column_index(c).is_some())
            .collect(),
        None => result.columns.clone(),
    };
    if columns.is_empty() {
        return Err(TrellisError::Validation(
            "no causal variable columns in fetched result".into(),
        ));
    }

    let indices: Vec<usize> = columns
        .iter()
        .filter_map(|c| result.column_index(c))
        .collect();

    // One coded column at a time, nulls kept as None until the row filter.
    let mut coded: Vec<Vec<Option<f64>>> = Vec::with_capacity(indices.len());
    for &idx in &indices {
        coded.push(code_column(result, idx));
    }

    let mut rows = Vec::new();
    for r in 0..result.rows.len() {
        let row: Option<Vec<f64>> = coded.iter().map(|col| col[r]).collect();
        if let Some(row) = row {
            rows.push(row);
        }
    }
    if rows.is_empty() {
        return Err(TrellisError::Validation(
            "no rows left after dropping nulls; cannot estimate".into(),
        ));
    }
    debug!(
        rows = rows.len(),
        dropped = result.rows.len() - rows.len(),
        "Frame assembled"
    );

    let mut frame = NumericFrame { columns, rows };

    let reserved: HashSet<String> = query
        .map(|q| {
            [&q.treatment, &q.outcome]
                .into_iter()
                .map(|v| base_name(v).to_string())
                .collect()
        })
        .unwrap_or_default();
    for (i, name) in frame.columns.clone().iter().enumerate() {
        if !reserved.contains(name) {
            zscore(&mut frame.rows, i);
        }
    }

    Ok(frame)
}

fn numeric_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn code_column(result: &QueryOutput, idx: usize) -> Vec<Option<f64>> {
    let values: Vec<&serde_json::Value> = result.rows.iter().map(|r| &r[idx]).collect();

    let all_numeric = values
        .iter()
        .filter(|v| !v.is_null())
        .all(|v| numeric_value(v).is_some());
    if all_numeric {
        return values.iter().map(|v| numeric_value(v)).collect();
    }

    // Categorical: code distinct values by sorted order.
    let distinct: BTreeSet<String> = values
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| category_key(v))
        .collect();
    let codes: Vec<String> = distinct.into_iter().collect();
    values
        .iter()
        .map(|v| {
            if v.is_null() {
                None
            } else {
                let key = category_key(v);
                codes.iter().position(|c| *c == key).map(|p| p as f64)
            }
        })
        .collect()
}

fn category_key(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn zscore(rows: &mut [Vec<f64>], col: usize) {
    let n = rows.len() as f64;
    let mean = rows.iter().map(|r| r[col]).sum::<f64>() / n;
    let var = rows.iter().map(|r| (r[col] - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    if std == 0.0 {
        return;
    }
    for row in rows {
        row[col] = (row[col] - mean) / std;
    }
}
