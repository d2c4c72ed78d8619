//! Mail provider: Microsoft Graph.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::error::ProviderError;
use crate::services::{AccessTokenSource, body_preview};

const PROVIDER: &str = "graph";

#[async_trait]
pub trait MailProvider: Send + Sync {
    async fn is_authenticated(&self) -> bool;

    /// Mark the message read at the provider.
    async fn mark_as_read(&self, external_id: &str) -> Result<(), ProviderError>;
}

/// Graph API client for the signed-in user's mailbox.
pub struct GraphMailClient {
    base_url: String,
    tokens: Arc<dyn AccessTokenSource>,
    client: reqwest::Client,
}

impl GraphMailClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn AccessTokenSource>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            client: reqwest::Client::new(),
        }
    }

    fn message_url(&self, external_id: &str) -> String {
        format!("{}/me/messages/{external_id}", self.base_url)
    }
}

#[async_trait]
impl MailProvider for GraphMailClient {
    async fn is_authenticated(&self) -> bool {
        self.tokens.is_authenticated().await
    }

    async fn mark_as_read(&self, external_id: &str) -> Result<(), ProviderError> {
        let token = self
            .tokens
            .access_token()
            .await
            .ok_or_else(|| ProviderError::NotAuthenticated {
                provider: PROVIDER.into(),
            })?;

        let resp = self
            .client
            .patch(self.message_url(external_id))
            .bearer_auth(token.expose_secret())
            .json(&serde_json::json!({ "isRead": true }))
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::BadStatus {
                provider: PROVIDER.into(),
                code: status.as_u16(),
                body: body_preview(&body),
            });
        }

        tracing::debug!(external_id, "Marked message read at provider");
        Ok(())
    }
}
