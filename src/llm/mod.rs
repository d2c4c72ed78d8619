//! LLM integration.
//!
//! Talks to any OpenAI-compatible `/v1/chat/completions` endpoint (LM Studio
//! by default) with a JSON-schema-constrained `response_format`. One request
//! per call; retries live in [`retry::RetryPolicy`] and parsing in [`parse`].

pub mod openai_compat;
pub mod parse;
pub mod provider;
pub mod retry;

pub use openai_compat::OpenAiCompatClient;
pub use provider::*;
pub use retry::RetryPolicy;

use std::sync::Arc;

use crate::config::LlmEndpointConfig;
use crate::error::LlmError;

/// Create the LLM client from configuration.
pub fn create_client(config: &LlmEndpointConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    Ok(Arc::new(OpenAiCompatClient::new(config.clone())?))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_client_uses_configured_model() {
        let config = LlmEndpointConfig {
            model: "qwen2.5-7b-instruct".to_string(),
            ..LlmEndpointConfig::default()
        };
        let client = create_client(&config).unwrap();
        assert_eq!(client.model_name(), "qwen2.5-7b-instruct");
    }
}
