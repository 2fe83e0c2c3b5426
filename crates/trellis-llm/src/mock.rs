use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::LlmClient;

/// Scripted LLM for tests.
///
/// Pops one canned outcome per `complete` call, in order, and counts calls
/// so tests can assert exactly how often a step consulted the model. An
/// exhausted script fails loudly rather than improvising.
pub struct MockLlm {
    script: Mutex<VecDeque<Result<String>>>,
    calls: Arc<AtomicUsize>,
}

impl MockLlm {
    pub fn scripted(outcomes: Vec<Result<String>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Script of plain successful replies.
    pub fn replies(texts: Vec<&str>) -> Self {
        Self::scripted(texts.into_iter().map(|t| Ok(t.to_string())).collect())
    }

    /// Shared call counter, usable after the mock is boxed away.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl LlmClient for MockLlm {
    fn complete(&self, _prompt: &str) -> BoxFuture<'_, Result<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .expect("mock script lock")
            .pop_front()
            .unwrap_or_else(|| Err(TrellisError::LlmRequest("mock script exhausted".into())));
        Box::pin(async move { next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_order() {
        let mock = MockLlm::replies(vec!["first", "second"]);
        assert_eq!(mock.complete("a").await.unwrap(), "first");
        assert_eq!(mock.complete("b").await.unwrap(), "second");
        assert!(mock.complete("c").await.is_err());
    }

    #[tokio::test]
    async fn test_call_counter() {
        let mock = MockLlm::replies(vec!["x"]);
        let calls = mock.call_counter();
        let _ = mock.complete("a").await;
        let _ = mock.complete("b").await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
