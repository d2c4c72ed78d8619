//! Calendar provider: Google Calendar v3.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::error::ProviderError;
use crate::services::{AccessTokenSource, body_preview};

const PROVIDER: &str = "google_calendar";

/// A validated event ready to be created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRequest {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub description: String,
    pub location: Option<String>,
    pub attendees: Vec<String>,
    pub calendar_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedEvent {
    pub event_id: String,
    pub event_url: Option<String>,
}

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn is_authenticated(&self) -> bool;

    async fn create_event(&self, event: EventRequest) -> Result<CreatedEvent, ProviderError>;
}

pub struct GoogleCalendarClient {
    base_url: String,
    tokens: Arc<dyn AccessTokenSource>,
    client: reqwest::Client,
}

impl GoogleCalendarClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn AccessTokenSource>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            client: reqwest::Client::new(),
        }
    }

    /// Google Calendar event resource for the request.
    fn event_body(event: &EventRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "summary": event.title,
            "description": event.description,
            "start": { "dateTime": event.start.to_rfc3339(), "timeZone": "UTC" },
            "end": { "dateTime": event.end.to_rfc3339(), "timeZone": "UTC" },
            "reminders": { "useDefault": true },
        });
        if let Some(location) = event.location.as_deref().filter(|l| !l.is_empty()) {
            body["location"] = serde_json::json!(location);
        }
        if !event.attendees.is_empty() {
            body["attendees"] = event
                .attendees
                .iter()
                .map(|email| serde_json::json!({ "email": email }))
                .collect();
        }
        body
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendarClient {
    async fn is_authenticated(&self) -> bool {
        self.tokens.is_authenticated().await
    }

    async fn create_event(&self, event: EventRequest) -> Result<CreatedEvent, ProviderError> {
        let token = self
            .tokens
            .access_token()
            .await
            .ok_or_else(|| ProviderError::NotAuthenticated {
                provider: PROVIDER.into(),
            })?;

        let url = format!("{}/calendars/{}/events", self.base_url, event.calendar_id);
        let resp = self
            .client
            .post(url)
            .bearer_auth(token.expose_secret())
            .json(&Self::event_body(&event))
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| ProviderError::RequestFailed {
            provider: PROVIDER.into(),
            reason: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(ProviderError::BadStatus {
                provider: PROVIDER.into(),
                code: status.as_u16(),
                body: body_preview(&text),
            });
        }

        let data: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;
        let event_id = data["id"]
            .as_str()
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: "missing event id".into(),
            })?
            .to_string();
        let event_url = data["htmlLink"].as_str().map(String::from);

        tracing::info!(event_id = %event_id, title = %event.title, start = %event.start, "Calendar event created");
        Ok(CreatedEvent {
            event_id,
            event_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::StaticTokenSource;
    use axum::Router;
    use axum::extract::{Path, State};
    use axum::routing::post;
    use chrono::TimeZone;
    use secrecy::SecretString;
    use tokio::sync::Mutex;

    type Seen = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

    async fn stub(
        State(seen): State<Seen>,
        Path(calendar): Path<String>,
        axum::Json(body): axum::Json<serde_json::Value>,
    ) -> axum::Json<serde_json::Value> {
        seen.lock().await.push((calendar, body));
        axum::Json(serde_json::json!({
            "id": "evt_42",
            "htmlLink": "https://calendar.google.com/event?eid=evt_42"
        }))
    }

    fn request() -> EventRequest {
        EventRequest {
            title: "Design review".into(),
            start: Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap(),
            description: "Meeting created from email: Design review".into(),
            location: None,
            attendees: vec!["bob@example.com".into()],
            calendar_id: "primary".into(),
        }
    }

    #[test]
    fn event_body_shape() {
        let body = GoogleCalendarClient::event_body(&request());
        assert_eq!(body["summary"], "Design review");
        assert_eq!(body["start"]["timeZone"], "UTC");
        assert_eq!(body["attendees"][0]["email"], "bob@example.com");
        assert_eq!(body["reminders"]["useDefault"], true);
        assert!(body.get("location").is_none());
    }

    #[tokio::test]
    async fn create_event_posts_to_calendar() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/calendars/{calendar}/events", post(stub))
            .with_state(Arc::clone(&seen));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let tokens = Arc::new(StaticTokenSource::new(Some(SecretString::from(
            "tok".to_string(),
        ))));
        let client = GoogleCalendarClient::new(format!("http://{addr}"), tokens);
        let created = client.create_event(request()).await.unwrap();

        assert_eq!(created.event_id, "evt_42");
        assert!(created.event_url.unwrap().contains("evt_42"));
        let seen = seen.lock().await;
        assert_eq!(seen[0].0, "primary");
        assert_eq!(seen[0].1["summary"], "Design review");
    }

    #[tokio::test]
    async fn create_event_without_token_fails() {
        let client = GoogleCalendarClient::new(
            "http://127.0.0.1:9",
            Arc::new(StaticTokenSource::new(None)),
        );
        let err = client.create_event(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotAuthenticated { .. }));
    }
}
