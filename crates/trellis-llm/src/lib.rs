//! LLM completion collaborators: provider clients, transport retry, reply
//! parsing, and a scripted mock for tests.

pub mod mock;
pub mod parse;
pub mod providers;
pub mod retry;

use trellis_core::config::ModelConfig;
use trellis_core::traits::LlmClient;

pub use mock::MockLlm;
pub use parse::{complete_json, complete_sql, extract_json, extract_sql};
pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Box<dyn LlmClient> {
    match config.provider.as_str() {
        "anthropic" | "claude" => Box::new(AnthropicClient::new(config.clone())),
        // Everything else uses the OpenAI-compatible client
        _ => Box::new(OpenAiClient::new(config.clone())),
    }
}
