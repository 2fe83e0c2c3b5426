use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use trellis_core::config::TransportRetryConfig;
use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::LlmClient;

/// An LLM client that retries transient transport failures.
///
/// This retries at the HTTP level (rate limits, 5xx, timeouts) and is
/// invisible to the workflow's attempt budget — artifact-level repair is
/// the retry loop's job, not this decorator's.
pub struct RetryingClient {
    inner: Box<dyn LlmClient>,
    config: TransportRetryConfig,
}

impl RetryingClient {
    pub fn new(inner: Box<dyn LlmClient>, config: TransportRetryConfig) -> Self {
        Self { inner, config }
    }
}

fn is_retryable(e: &TrellisError) -> bool {
    match e {
        TrellisError::LlmRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &TransportRetryConfig) -> Duration {
    let ms = (config.initial_backoff_ms * 2u64.pow(attempt)).min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn complete(&self, prompt: &str) -> BoxFuture<'_, Result<String>> {
        let prompt = prompt.to_string();

        Box::pin(async move {
            let max_retries = self.config.max_retries;
            let mut last_err = None;

            for attempt in 0..=max_retries {
                match self.inner.complete(&prompt).await {
                    Ok(text) => return Ok(text),
                    Err(e) => {
                        if is_retryable(&e) && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.config);
                            warn!(
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying LLM request"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        return Err(e);
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| TrellisError::LlmRequest("request failed".into())))
        })
    }
}
