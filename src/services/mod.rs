//! External provider collaborators: mail and calendar.
//!
//! Token acquisition and refresh are owned elsewhere; the clients here only
//! ask an [`AccessTokenSource`] for the current bearer token.

pub mod calendar;
pub mod mail;

pub use calendar::{CalendarProvider, CreatedEvent, EventRequest, GoogleCalendarClient};
pub use mail::{GraphMailClient, MailProvider};

use async_trait::async_trait;
use secrecy::SecretString;

/// Supplies the current OAuth access token for a provider.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// `None` when the user has not connected the provider.
    async fn access_token(&self) -> Option<SecretString>;

    async fn is_authenticated(&self) -> bool {
        self.access_token().await.is_some()
    }
}

/// A fixed token read from configuration.
pub struct StaticTokenSource {
    token: Option<SecretString>,
}

impl StaticTokenSource {
    pub fn new(token: Option<SecretString>) -> Self {
        Self { token }
    }
}

#[async_trait]
impl AccessTokenSource for StaticTokenSource {
    async fn access_token(&self) -> Option<SecretString> {
        self.token.clone()
    }
}

/// Trim a response body for error messages.
fn body_preview(body: &str) -> String {
    crate::safety::truncate_chars(body, 500)
}
