use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use trellis_core::config::ModelConfig;
use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::LlmClient;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API client.
pub struct AnthropicClient {
    http: Client,
    config: ModelConfig,
}

impl AnthropicClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl LlmClient for AnthropicClient {
    fn complete(&self, prompt: &str) -> BoxFuture<'_, Result<String>> {
        let body = MessagesRequest {
            model: self.config.model_id.clone(),
            max_tokens: self.config.max_tokens,
            messages: vec![ApiMessage {
                role: "user".into(),
                content: prompt.to_string(),
            }],
            temperature: Some(self.config.temperature),
        };

        Box::pin(async move {
            let url = self
                .config
                .base_url
                .as_deref()
                .unwrap_or(ANTHROPIC_API_URL)
                .to_string();

            let mut req = self
                .http
                .post(&url)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body);
            if let Some(key) = &self.config.api_key {
                req = req.header("x-api-key", key);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| TrellisError::LlmRequest(e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(TrellisError::LlmRequest(format!(
                    "{}: {}",
                    status, text
                )));
            }

            let parsed: MessagesResponse = resp
                .json()
                .await
                .map_err(|e| TrellisError::LlmRequest(e.to_string()))?;

            let text = parsed
                .content
                .into_iter()
                .filter_map(|b| b.text)
                .collect::<Vec<_>>()
                .join("");

            if text.is_empty() {
                return Err(TrellisError::LlmRequest("empty completion".into()));
            }
            Ok(text)
        })
    }
}
