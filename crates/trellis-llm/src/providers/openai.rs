use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use trellis_core::config::ModelConfig;
use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::LlmClient;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq,
/// OpenRouter, etc. via `base_url`.
pub struct OpenAiClient {
    http: Client,
    config: ModelConfig,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct OaiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl LlmClient for OpenAiClient {
    fn complete(&self, prompt: &str) -> BoxFuture<'_, Result<String>> {
        let body = ChatRequest {
            model: self.config.model_id.clone(),
            messages: vec![OaiMessage {
                role: "user".into(),
                content: prompt.to_string(),
            }],
            max_tokens: self.config.max_tokens,
            temperature: Some(self.config.temperature),
        };

        Box::pin(async move {
            let url = self
                .config
                .base_url
                .as_deref()
                .unwrap_or(OPENAI_API_URL)
                .to_string();

            let mut req = self.http.post(&url).json(&body);
            if let Some(key) = &self.config.api_key {
                req = req.bearer_auth(key);
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

            let parsed: ChatResponse = resp
                .json()
                .await
                .map_err(|e| TrellisError::LlmRequest(e.to_string()))?;

            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| TrellisError::LlmRequest("empty completion".into()))
        })
    }
}
