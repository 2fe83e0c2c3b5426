use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::warn;

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::LlmClient;

/// How many times a non-conforming structured reply is re-asked with the
/// same prompt before the parse error escalates.
pub const PARSE_RETRIES: u32 = 2;

/// Extract JSON from a reply that may wrap it in markdown code fences.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    // Try to find JSON object directly
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            return &trimmed[start..=end];
        }
    }
    trimmed
}

/// Extract the last SQL statement from a reply.
///
/// Prefers the last ```sql fence; falls back to scanning for a bare
/// SELECT/WITH statement. Trailing semicolons are stripped either way.
pub fn extract_sql(text: &str) -> Option<String> {
    let fence = Regex::new(r"(?s)```sql(.*?)```").expect("static regex");
    if let Some(last) = fence
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .last()
    {
        let sql = last.as_str().trim().trim_end_matches(';').trim_end();
        if !sql.is_empty() {
            return Some(sql.to_string());
        }
    }

    // Case-insensitive match on the original text; slicing an uppercased
    // copy by byte offset is unsound when case folding resizes characters.
    let bare = Regex::new(r"(?si)\b(?:select|with)\b.*").expect("static regex");
    bare.find(text.trim())
        .map(|m| m.as_str().trim().trim_end_matches(';').trim_end().to_string())
}

/// Ask for a structured reply and decode it.
///
/// A reply that does not decode into `T` is a recoverable parse error: the
/// same prompt is re-sent up to `PARSE_RETRIES` times before the last parse
/// error is returned to the caller.
pub async fn complete_json<T: DeserializeOwned>(llm: &dyn LlmClient, prompt: &str) -> Result<T> {
    let mut last_err = None;

    for attempt in 0..=PARSE_RETRIES {
        let reply = llm.complete(prompt).await?;
        let json = extract_json(&reply);
        match serde_json::from_str::<T>(json) {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(attempt, error = %e, "Structured reply did not conform, re-asking");
                last_err = Some(TrellisError::Parse(format!(
                    "reply did not decode into expected shape: {}",
                    e
                )));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| TrellisError::Parse("no reply".into())))
}

/// Ask for a SQL statement and extract it from the reply.
///
/// Same re-ask policy as `complete_json`: a reply with no recognizable SQL
/// is a recoverable parse error, retried up to `PARSE_RETRIES` times.
pub async fn complete_sql(llm: &dyn LlmClient, prompt: &str) -> Result<String> {
    let mut last_err = None;

    for attempt in 0..=PARSE_RETRIES {
        let reply = llm.complete(prompt).await?;
        match extract_sql(&reply) {
            Some(sql) => return Ok(sql),
            None => {
                warn!(attempt, "Reply contained no SQL, re-asking");
                last_err = Some(TrellisError::Parse("reply contained no SQL".into()));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| TrellisError::Parse("no reply".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLlm;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        ok: bool,
        reason: String,
    }

    #[test]
    fn test_extract_json_plain() {
        let input = r#"{"ok": true, "reason": "fine"}"#;
        assert_eq!(extract_json(input), input);
    }

    #[test]
    fn test_extract_json_code_fence() {
        let input = "Here you go:\n```json\n{\"ok\": false, \"reason\": \"empty\"}\n```";
        let v: Verdict = serde_json::from_str(extract_json(input)).unwrap();
        assert!(!v.ok);
    }

    #[test]
    fn test_extract_json_embedded() {
        let input = r#"The verdict is {"ok": true, "reason": "fine"} overall."#;
        let v: Verdict = serde_json::from_str(extract_json(input)).unwrap();
        assert!(v.ok);
    }

    #[test]
    fn test_extract_sql_fenced() {
        let input = "First try:\n```sql\nSELECT 1\n```\nBetter:\n```sql\nSELECT a FROM t\n```";
        assert_eq!(extract_sql(input).unwrap(), "SELECT a FROM t");
    }

    #[test]
    fn test_extract_sql_bare() {
        let input = "Sure!  SELECT name FROM users WHERE active = 1;";
        assert_eq!(
            extract_sql(input).unwrap(),
            "SELECT name FROM users WHERE active = 1"
        );
    }

    #[test]
    fn test_extract_sql_bare_multibyte_prefix() {
        // Ligatures grow under case folding; the scan must not slice the
        // original text with an offset taken from an uppercased copy.
        assert_eq!(extract_sql("ﬁﬁ select 1").unwrap(), "select 1");
        assert_eq!(
            extract_sql("Voilà: WITH t AS (SELECT 1) SELECT * FROM t").unwrap(),
            "WITH t AS (SELECT 1) SELECT * FROM t"
        );
    }

    #[test]
    fn test_extract_sql_strips_trailing_semicolon() {
        assert_eq!(
            extract_sql("```sql\nSELECT a FROM t;\n```").unwrap(),
            "SELECT a FROM t"
        );
    }

    #[test]
    fn test_extract_sql_none() {
        assert!(extract_sql("I cannot write that query.").is_none());
    }

    #[tokio::test]
    async fn test_complete_json_success() {
        let mock = MockLlm::replies(vec![r#"{"ok": true, "reason": "fine"}"#]);
        let v: Verdict = complete_json(&mock, "judge").await.unwrap();
        assert_eq!(
            v,
            Verdict {
                ok: true,
                reason: "fine".into()
            }
        );
    }

    #[tokio::test]
    async fn test_complete_json_retries_on_parse_failure() {
        let mock = MockLlm::replies(vec!["not json at all", r#"{"ok": true, "reason": "r"}"#]);
        let calls = mock.call_counter();
        let v: Verdict = complete_json(&mock, "judge").await.unwrap();
        assert!(v.ok);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_complete_json_escalates_after_budget() {
        let mock = MockLlm::replies(vec!["nope", "still nope", "never json"]);
        let calls = mock.call_counter();
        let err = complete_json::<Verdict>(&mock, "judge").await.unwrap_err();
        assert!(matches!(err, TrellisError::Parse(_)));
        assert_eq!(
            calls.load(std::sync::atomic::Ordering::SeqCst),
            (PARSE_RETRIES + 1) as usize
        );
    }

    #[tokio::test]
    async fn test_complete_json_propagates_transport_error() {
        let mock = MockLlm::scripted(vec![Err(TrellisError::LlmRequest("down".into()))]);
        let err = complete_json::<Verdict>(&mock, "judge").await.unwrap_err();
        assert!(matches!(err, TrellisError::LlmRequest(_)));
    }
}
