//! Prompt builders for the text-to-SQL workflow.
//!
//! Shapes mirror the production templates; wording is intentionally plain.

pub fn draft(question: &str, schema_brief: &str, fk_brief: &str, notes: Option<&str>) -> String {
    format!(
        "Given the database schema below, write one SQLite query answering the question.\n\
         Reply with the query in a ```sql fence.\n\n\
         {schema_brief}\n\nForeign keys:\n{fk_brief}\n\n\
         Question: {question}\n\
         Hints: {notes}\n",
        notes = notes.unwrap_or("none"),
    )
}

pub fn repair(
    question: &str,
    schema_brief: &str,
    fk_brief: &str,
    sql: &str,
    error: &str,
) -> String {
    format!(
        "The SQL query below failed. Fix it so it runs on the schema and still answers the\n\
         question. Reply with the corrected query in a ```sql fence.\n\n\
         {schema_brief}\n\nForeign keys:\n{fk_brief}\n\n\
         Question: {question}\n\nFailed SQL:\n```sql\n{sql}\n```\n\nError: {error}\n",
    )
}

pub fn repair_with_feedback(
    question: &str,
    schema_brief: &str,
    fk_brief: &str,
    sql: &str,
    feedback: &str,
) -> String {
    format!(
        "The SQL query below executed, but a reviewer judged the result wrong for the\n\
         question. Rewrite the query to address the feedback. Reply with the new query\n\
         in a ```sql fence.\n\n\
         {schema_brief}\n\nForeign keys:\n{fk_brief}\n\n\
         Question: {question}\n\nCurrent SQL:\n```sql\n{sql}\n```\n\nReviewer feedback: {feedback}\n",
    )
}

pub fn review(question: &str, sql: &str, result_sample: &str) -> String {
    format!(
        "A query was generated for the question below and executed successfully.\n\
         Judge whether the result actually answers the question.\n\
         Reply with JSON: {{\"accept\": true|false, \"reason\": \"...\"}}.\n\n\
         Question: {question}\n\nSQL:\n```sql\n{sql}\n```\n\nResult (truncated): {result_sample}\n",
    )
}
