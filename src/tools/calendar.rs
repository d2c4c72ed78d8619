//! `create_calendar_event`: turn a meeting email into a calendar entry.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;

use crate::pipeline::types::Message;
use crate::services::{CalendarProvider, EventRequest};
use crate::tools::datetime::parse_datetime;
use crate::tools::tool::{Tool, ToolResult};

pub const TOOL_NAME: &str = "create_calendar_event";

/// Words that suggest the email is about a meeting.
const MEETING_KEYWORDS: &[&str] = &[
    "meeting",
    "call",
    "conference",
    "appointment",
    "interview",
    "demo",
    "presentation",
    "sync",
    "standup",
    "review",
    "zoom",
    "teams",
    "webex",
    "hangout",
    "skype",
];

pub struct CalendarEventTool {
    calendar: Arc<dyn CalendarProvider>,
}

impl CalendarEventTool {
    pub fn new(calendar: Arc<dyn CalendarProvider>) -> Self {
        Self { calendar }
    }

    /// First meeting keyword found in the subject or body.
    fn meeting_keyword(message: &Message) -> Option<&'static str> {
        let subject = message.subject.to_lowercase();
        let body = message.body_text.to_lowercase();
        MEETING_KEYWORDS
            .iter()
            .copied()
            .find(|kw| subject.contains(kw) || body.contains(kw))
    }
}

fn str_param<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl Tool for CalendarEventTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Create a calendar event when a meeting is detected in an email. \
         Use the meeting details from the email content to fill in the event."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "The title of the meeting event (\"summary\" is accepted too)"
                },
                "summary": {
                    "type": "string",
                    "description": "Alternative to title"
                },
                "start_time": {
                    "type": "string",
                    "description": "Start time in ISO 8601 format (e.g. 2024-01-15T14:00:00Z). Convert relative dates like \"tomorrow at 6 PM\" to absolute ISO format."
                },
                "end_time": {
                    "type": "string",
                    "description": "End time in ISO 8601 format (e.g. 2024-01-15T15:00:00Z)."
                },
                "location": { "type": "string", "description": "Meeting location (optional)" },
                "description": { "type": "string", "description": "Meeting description (optional)" },
                "attendees": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Attendee email addresses (optional)"
                },
                "calendar_id": {
                    "type": "string",
                    "description": "Calendar to create the event in (defaults to primary)"
                }
            },
            "required": ["start_time", "end_time"]
        })
    }

    async fn is_available(&self, message: &Message) -> bool {
        if !self.calendar.is_authenticated().await {
            tracing::debug!(message_id = %message.id, "Calendar tool unavailable: not authenticated");
            return false;
        }
        match Self::meeting_keyword(message) {
            Some(keyword) => {
                tracing::info!(message_id = %message.id, keyword, "Calendar tool available");
                true
            }
            None => {
                tracing::debug!(message_id = %message.id, "Calendar tool unavailable: no meeting keywords");
                false
            }
        }
    }

    async fn execute(&self, message: &Message, params: serde_json::Value) -> ToolResult {
        let title = str_param(&params, "title").or_else(|| str_param(&params, "summary"));
        let start_raw = str_param(&params, "start_time");
        let end_raw = str_param(&params, "end_time");

        let (Some(title), Some(start_raw), Some(end_raw)) = (title, start_raw, end_raw) else {
            let mut missing = Vec::new();
            if title.is_none() {
                missing.push("title");
            }
            if start_raw.is_none() {
                missing.push("start_time");
            }
            if end_raw.is_none() {
                missing.push("end_time");
            }
            return ToolResult::failure(format!(
                "Missing required parameters: {}",
                missing.join(", ")
            ));
        };

        let now = Local::now();
        let start = parse_datetime(start_raw, &now);
        let end = parse_datetime(end_raw, &now);
        let (start, end) = match (start, end) {
            (Some(s), Some(e)) => (s, e),
            (s, e) => {
                let mut bad = Vec::new();
                if s.is_none() {
                    bad.push("start_time");
                }
                if e.is_none() {
                    bad.push("end_time");
                }
                return ToolResult::failure(format!(
                    "Invalid date/time format for {}. Please use ISO 8601 format (e.g. 2024-01-15T14:00:00Z)",
                    bad.join(", ")
                ));
            }
        };

        let attendees: Vec<String> = params
            .get("attendees")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str())
                    .filter(|s| !s.trim().is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let attendees = if attendees.is_empty() {
            vec![message.sender_address.clone()]
        } else {
            attendees
        };

        let request = EventRequest {
            title: title.to_string(),
            start,
            end,
            description: str_param(&params, "description")
                .map(String::from)
                .unwrap_or_else(|| format!("Meeting created from email: {}", message.subject)),
            location: str_param(&params, "location").map(String::from),
            attendees,
            calendar_id: str_param(&params, "calendar_id")
                .unwrap_or("primary")
                .to_string(),
        };

        match self.calendar.create_event(request.clone()).await {
            Ok(created) => {
                tracing::info!(
                    message_id = %message.id,
                    event_id = %created.event_id,
                    title = %request.title,
                    "Calendar event created via tool"
                );
                ToolResult::success(serde_json::json!({
                    "event_id": created.event_id,
                    "event_url": created.event_url,
                    "details": {
                        "title": request.title,
                        "start_time": request.start.to_rfc3339(),
                        "end_time": request.end.to_rfc3339(),
                        "location": request.location,
                    }
                }))
            }
            Err(e) => {
                tracing::error!(message_id = %message.id, error = %e, "Calendar tool execution failed");
                ToolResult::failure(format!("Failed to create calendar event: {e}"))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::services::CreatedEvent;
    use tokio::sync::Mutex;

    /// Records created events; optionally fails every call.
    pub(crate) struct MockCalendar {
        pub authenticated: bool,
        pub fail: bool,
        pub created: Mutex<Vec<EventRequest>>,
    }

    impl MockCalendar {
        pub(crate) fn new(authenticated: bool) -> Self {
            Self {
                authenticated,
                fail: false,
                created: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CalendarProvider for MockCalendar {
        async fn is_authenticated(&self) -> bool {
            self.authenticated
        }

        async fn create_event(&self, event: EventRequest) -> Result<CreatedEvent, ProviderError> {
            if self.fail {
                return Err(ProviderError::RequestFailed {
                    provider: "mock".into(),
                    reason: "calendar down".into(),
                });
            }
            let mut created = self.created.lock().await;
            created.push(event);
            Ok(CreatedEvent {
                event_id: format!("evt_{}", created.len()),
                event_url: Some("https://calendar.example/evt".into()),
            })
        }
    }

    fn message(subject: &str, body: &str) -> Message {
        Message::fixture("m1", subject, body)
    }

    #[tokio::test]
    async fn available_with_keyword_and_auth() {
        let tool = CalendarEventTool::new(Arc::new(MockCalendar::new(true)));
        assert!(tool.is_available(&message("Design Review", "")).await);
        assert!(tool.is_available(&message("Hi", "join the Zoom link")).await);
        assert!(!tool.is_available(&message("Invoice", "amount due")).await);
    }

    #[tokio::test]
    async fn unavailable_without_auth() {
        let tool = CalendarEventTool::new(Arc::new(MockCalendar::new(false)));
        assert!(!tool.is_available(&message("Meeting tomorrow", "")).await);
    }

    #[tokio::test]
    async fn missing_fields_fail_without_calling_provider() {
        let calendar = Arc::new(MockCalendar::new(true));
        let tool = CalendarEventTool::new(calendar.clone());
        let result = tool
            .execute(
                &message("Meeting", ""),
                serde_json::json!({"start_time": "2026-03-10T14:00:00Z"}),
            )
            .await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Missing required parameters: title, end_time")
        );
        assert!(calendar.created.lock().await.is_empty());
    }

    #[tokio::test]
    async fn missing_end_time_is_named_alone() {
        let tool = CalendarEventTool::new(Arc::new(MockCalendar::new(true)));
        let result = tool
            .execute(
                &message("Meeting", ""),
                serde_json::json!({"summary": "Sync", "start_time": "2026-03-10T14:00:00Z"}),
            )
            .await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert_eq!(error, "Missing required parameters: end_time");
        assert!(!error.contains("title"));
        assert!(!error.contains("start_time"));
    }

    #[tokio::test]
    async fn unparseable_time_names_field() {
        let tool = CalendarEventTool::new(Arc::new(MockCalendar::new(true)));
        let result = tool
            .execute(
                &message("Meeting", ""),
                serde_json::json!({
                    "title": "Sync",
                    "start_time": "2026-03-10T14:00:00Z",
                    "end_time": "whenever"
                }),
            )
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("end_time"));
    }

    #[tokio::test]
    async fn creates_event_with_defaults() {
        let calendar = Arc::new(MockCalendar::new(true));
        let tool = CalendarEventTool::new(calendar.clone());
        let result = tool
            .execute(
                &message("Project sync", "see you"),
                serde_json::json!({
                    "summary": "Project sync",
                    "start_time": "2026-03-10T14:00:00Z",
                    "end_time": "2026-03-10T15:00:00Z"
                }),
            )
            .await;

        assert!(result.success);
        let data = result.data.unwrap();
        assert_eq!(data["event_id"], "evt_1");
        assert_eq!(data["details"]["title"], "Project sync");

        let created = calendar.created.lock().await;
        assert_eq!(created[0].attendees, vec!["bob@example.com".to_string()]);
        assert_eq!(created[0].calendar_id, "primary");
        assert_eq!(
            created[0].description,
            "Meeting created from email: Project sync"
        );
    }

    #[tokio::test]
    async fn provider_error_becomes_failure() {
        let mut calendar = MockCalendar::new(true);
        calendar.fail = true;
        let tool = CalendarEventTool::new(Arc::new(calendar));
        let result = tool
            .execute(
                &message("Meeting", ""),
                serde_json::json!({
                    "title": "Sync",
                    "start_time": "2026-03-10T14:00:00Z",
                    "end_time": "2026-03-10T15:00:00Z"
                }),
            )
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("calendar down"));
    }
}
