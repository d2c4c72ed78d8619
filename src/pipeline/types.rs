//! Shared types for the message processing pipeline.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

pub use crate::pipeline::state::MessageStatus;

// ── Messages ────────────────────────────────────────────────────────

/// Body encoding as delivered by the mail provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyFormat {
    #[default]
    Plain,
    /// HTML or similar tag-based markup.
    Markup,
}

impl BodyFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Markup => "markup",
        }
    }

    /// Unknown values read as plain text.
    pub fn parse(s: &str) -> Self {
        match s {
            "markup" | "html" => Self::Markup,
            _ => Self::Plain,
        }
    }
}

/// A message as handed over by mail sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    /// Stable identifier assigned by the caller.
    pub id: String,
    /// Provider-native id used for provider calls.
    pub external_id: String,
    pub subject: String,
    pub sender_name: String,
    pub sender_address: String,
    #[serde(default)]
    pub preview_text: String,
    #[serde(default)]
    pub body_text: String,
    #[serde(default)]
    pub body_format: BodyFormat,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub has_attachments: bool,
}

/// A persisted message with its pipeline state.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub external_id: String,
    pub subject: String,
    pub sender_name: String,
    pub sender_address: String,
    pub preview_text: String,
    pub body_text: String,
    pub body_format: BodyFormat,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    pub has_attachments: bool,
    pub ai_eligible: bool,
    pub status: MessageStatus,
    pub screening_result: Option<ScreeningResult>,
    pub screening_completed_at: Option<DateTime<Utc>>,
    pub analysis_response: Option<String>,
    pub executed_actions: Vec<ExecutedAction>,
    pub last_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// `Name <address>`, or just the address when there is no name.
    pub fn from_line(&self) -> String {
        if self.sender_name.trim().is_empty() {
            self.sender_address.clone()
        } else {
            format!("{} <{}>", self.sender_name, self.sender_address)
        }
    }

    /// Only eligible messages in `pending` may be claimed by a stage.
    pub fn is_claimable(&self) -> bool {
        self.ai_eligible && self.status == MessageStatus::Pending
    }
}

// ── LLM verdicts ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    #[default]
    Low,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

/// The model's confidence in its own screening verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

/// Decode a field, falling back to its default when the value has the
/// wrong shape (`"priority": "urgent"`, a string where a bool belongs).
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Like [`lenient`] for strings, but an empty or missing value also
/// takes the default.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

/// Keep the entries that decode; drop the rest.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let serde_json::Value::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

fn unknown_category() -> String {
    "unknown".to_string()
}

fn general_category() -> String {
    "general".to_string()
}

fn category<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_text(deserializer)?.unwrap_or_else(unknown_category))
}

fn analysis_category<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_text(deserializer)?.unwrap_or_else(general_category))
}

fn quick_analysis<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_text(deserializer)?.unwrap_or_else(default_quick_analysis))
}

fn default_quick_analysis() -> String {
    "Screening completed".to_string()
}

fn summary<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_text(deserializer)?.unwrap_or_else(default_summary))
}

fn default_summary() -> String {
    "No summary".to_string()
}

/// Output of the metadata-only screening call.
///
/// Every field decodes on its own, so one odd value from the model does
/// not discard the rest of the verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningResult {
    #[serde(default = "unknown_category", deserialize_with = "category")]
    pub category: String,
    #[serde(default, deserialize_with = "lenient")]
    pub priority: Priority,
    #[serde(default, deserialize_with = "lenient")]
    pub sentiment: Sentiment,
    #[serde(default, deserialize_with = "lenient")]
    pub needs_full_processing: bool,
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub full_processing_reason: Option<String>,
    #[serde(default = "default_quick_analysis", deserialize_with = "quick_analysis")]
    pub quick_analysis: String,
    #[serde(default, deserialize_with = "lenient")]
    pub confidence: Confidence,
}

impl ScreeningResult {
    /// Used when the model's output cannot be parsed.
    pub fn fallback() -> Self {
        Self {
            category: "unknown".to_string(),
            priority: Priority::Medium,
            sentiment: Sentiment::Neutral,
            needs_full_processing: false,
            full_processing_reason: None,
            quick_analysis: "Screening completed (parsing error)".to_string(),
            confidence: Confidence::Low,
        }
    }
}

/// An action the model suggests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedAction {
    pub action: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub reason: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub execute: bool,
}

/// A tool invocation the model suggests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default, deserialize_with = "lenient_text")]
    pub reason: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub execute: bool,
}

/// Output of the full-content analysis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default = "default_summary", deserialize_with = "summary")]
    pub summary: String,
    #[serde(default, deserialize_with = "lenient")]
    pub priority: Priority,
    #[serde(default = "general_category", deserialize_with = "analysis_category")]
    pub category: String,
    #[serde(default, deserialize_with = "lenient")]
    pub sentiment: Sentiment,
    #[serde(default, deserialize_with = "lenient_list")]
    pub actions: Vec<SuggestedAction>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub tool_calls: Vec<SuggestedToolCall>,
    #[serde(default, deserialize_with = "lenient")]
    pub response: String,
}

impl AnalysisResult {
    /// Used when the model's output cannot be parsed; keeps the raw text.
    pub fn fallback(raw: &str) -> Self {
        Self {
            summary: "AI analysis completed".to_string(),
            priority: Priority::Medium,
            category: "general".to_string(),
            sentiment: Sentiment::Neutral,
            actions: Vec::new(),
            tool_calls: Vec::new(),
            response: raw.to_string(),
        }
    }
}

// ── Executed actions ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Failed,
    /// Recorded for a human; no side effect was performed.
    Logged,
}

/// Outcome record for one executed action or tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutedAction {
    Action {
        action: String,
        status: ActionStatus,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ToolCall {
        tool_name: String,
        parameters: serde_json::Value,
        reason: String,
        status: ActionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ExecutedAction {
    pub fn status(&self) -> ActionStatus {
        match self {
            Self::Action { status, .. } | Self::ToolCall { status, .. } => *status,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status() == ActionStatus::Failed
    }
}

/// What a stage did with the message it was handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Guard or claim rejected the message; nothing changed.
    Skipped,
    /// Screening wants full processing; a process job was dispatched.
    Requeued,
    ScreenedOnly,
    Completed,
    /// The stage recorded `failed` on the message.
    Failed,
}

#[cfg(test)]
impl NewMessage {
    /// Same content as [`Message::fixture`], before intake.
    pub(crate) fn fixture(id: &str, subject: &str, body: &str) -> Self {
        Self {
            id: id.to_string(),
            external_id: format!("ext-{id}"),
            subject: subject.to_string(),
            sender_name: "Bob".to_string(),
            sender_address: "bob@example.com".to_string(),
            preview_text: String::new(),
            body_text: body.to_string(),
            body_format: BodyFormat::Plain,
            received_at: Utc::now(),
            is_read: false,
            has_attachments: false,
        }
    }
}

#[cfg(test)]
impl Message {
    /// An eligible, unread, pending message for tests.
    pub(crate) fn fixture(id: &str, subject: &str, body: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            external_id: format!("ext-{id}"),
            subject: subject.to_string(),
            sender_name: "Bob".to_string(),
            sender_address: "bob@example.com".to_string(),
            preview_text: String::new(),
            body_text: body.to_string(),
            body_format: BodyFormat::Plain,
            received_at: now,
            is_read: false,
            has_attachments: false,
            ai_eligible: true,
            status: MessageStatus::Pending,
            screening_result: None,
            screening_completed_at: None,
            analysis_response: None,
            executed_actions: Vec::new(),
            last_error: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
