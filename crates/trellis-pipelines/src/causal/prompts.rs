//! Prompt builders for the causal-analysis workflow.

use trellis_core::types::{CausalEstimate, Strategy};

use super::query::CausalQuery;

pub fn parse(question: &str, schema_brief: &str) -> String {
    format!(
        "Identify the causal variables in the question below, using only columns from the\n\
         schema. Reply with JSON:\n\
         {{\"treatment\": \"...\", \"outcome\": \"...\", \"confounders\": [...],\n\
          \"mediators\": [...], \"instrumental_variables\": [...],\n\
          \"main_table\": \"...\", \"join_tables\": [...]}}.\n\
         Use measured quantities, never identifier columns.\n\n\
         {schema_brief}\n\nQuestion: {question}\n",
    )
}

pub fn parse_with_issues(question: &str, schema_brief: &str, issues: &[String]) -> String {
    format!(
        "{base}\nYour previous variable selection had problems:\n{issues}\nFix them and reply again.\n",
        base = parse(question, schema_brief),
        issues = issues.join("\n"),
    )
}

pub fn generate(query: &CausalQuery, schema_brief: &str) -> String {
    format!(
        "Write one SQLite query returning every variable below as a column (base name,\n\
         no table prefix in the output). Reply with the query in a ```sql fence.\n\n\
         {schema_brief}\n\n\
         Variables: {vars}\n\
         Main table: {main}\nJoin tables: {joins}\n",
        vars = query.expected_columns().join(", "),
        main = query.main_table,
        joins = query.join_tables.join(", "),
    )
}

pub fn fix_sql(query: &CausalQuery, schema_brief: &str, sql: &str, error: &str) -> String {
    format!(
        "The SQL query below failed to produce the required columns. Fix it; the result\n\
         must contain every variable as a column. Reply with the corrected query in a\n\
         ```sql fence.\n\n\
         {schema_brief}\n\n\
         Variables: {vars}\n\nFailed SQL:\n```sql\n{sql}\n```\n\nProblem: {error}\n",
        vars = query.expected_columns().join(", "),
    )
}

pub fn strategy(query: &CausalQuery, columns: &[String], sample: &str) -> String {
    format!(
        "Pick a causal inference strategy for the data below. Reply with JSON:\n\
         {{\"task\": \"ate\"|\"att\", \"identification\": \"backdoor\"|\"iv\"|\"mediation\",\n\
          \"estimator\": \"...\", \"refuter\": \"...\"|null}}.\n\n\
         Treatment: {treatment}\nOutcome: {outcome}\n\
         Confounders: {confounders}\nInstruments: {instruments}\n\
         Columns: {columns}\nSample rows:\n{sample}\n",
        treatment = query.treatment,
        outcome = query.outcome,
        confounders = query.confounders.join(", "),
        instruments = query.instrumental_variables.join(", "),
        columns = columns.join(", "),
    )
}

pub fn answer(question: &str, query: &CausalQuery, strategy: &Strategy, estimate: &CausalEstimate) -> String {
    format!(
        "Explain this causal estimate as a short answer to the question. Mention the\n\
         effect size, the method, and the refutation check if present. Plain text only.\n\n\
         Question: {question}\n\
         Treatment: {treatment}\nOutcome: {outcome}\n\
         Method: {identification} / {estimator}\n\
         Effect estimate: {value}\nSample size: {n}\nRefutation: {refutation}\n",
        treatment = query.treatment,
        outcome = query.outcome,
        identification = strategy.identification,
        estimator = estimate.estimator,
        value = estimate.value,
        n = estimate.sample_size,
        refutation = estimate.refutation.as_deref().unwrap_or("none"),
    )
}
