//! OpenAI-compatible chat-completions client (LM Studio, vLLM, OpenAI).

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::json;
use tracing::{debug, info};

use crate::config::LlmEndpointConfig;
use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, LlmClient};

/// Max characters of an error body kept in `LlmError::BadStatus`.
const ERROR_BODY_CHARS: usize = 500;

/// HTTP client for a `/v1/chat/completions` endpoint.
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    config: LlmEndpointConfig,
}

impl OpenAiCompatClient {
    pub fn new(config: LlmEndpointConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LlmError::Unreachable(format!("Failed to create HTTP client: {e}")))?;
        info!(url = %config.url, model = %config.model, "LLM client configured");
        Ok(Self { client, config })
    }

    fn build_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt},
            ],
        });
        if let Some(ref schema) = request.response_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "strict": true,
                    "schema": schema.schema,
                }
            });
        }
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(n) = request.max_tokens {
            body["max_tokens"] = json!(n);
        }
        body
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let body = self.build_body(&request);
        let mut builder = self.client.post(&self.config.url).json(&body);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Unreachable(format!("request timed out: {e}"))
            } else {
                LlmError::Unreachable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::BadStatus {
                code: status.as_u16(),
                body: text.chars().take(ERROR_BODY_CHARS).collect(),
            });
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(format!("body is not JSON: {e}")))?;

        let content = payload
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                LlmError::MalformedResponse("missing choices[0].message.content".to_string())
            })?;

        debug!(model = %self.config.model, chars = content.len(), "LLM completion received");
        Ok(content.to_string())
    }
}
