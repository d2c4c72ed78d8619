//! Error types for the mail triage pipeline.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Field {field} of message {id} is already set")]
    WriteOnce { id: String, field: &'static str },

    #[error("Message {id} cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },
}

impl DatabaseError {
    /// Connection and query failures may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Pool(_) | Self::Query(_))
    }
}

/// LLM endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("LLM endpoint returned HTTP {code}: {body}")]
    BadStatus { code: u16, body: String },

    #[error("Malformed LLM response: {0}")]
    MalformedResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Network failures, 5xx and 429 are worth retrying. Everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(_) => true,
            Self::BadStatus { code, .. } => *code >= 500 || *code == 429,
            Self::MalformedResponse(_) | Self::Json(_) => false,
        }
    }
}

/// Errors from the mail and calendar provider collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider {provider} is not authenticated")]
    NotAuthenticated { provider: String },

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} returned HTTP {code}: {body}")]
    BadStatus {
        provider: String,
        code: u16,
        body: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Pipeline stage errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Message {0} not found")]
    MessageNotFound(String),

    /// Storage failure before the claim; nothing was changed.
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    /// Failure after the message was claimed; the stage cannot safely re-run.
    #[error("Stage {stage} aborted for message {message_id}: {reason}")]
    StageAborted {
        stage: &'static str,
        message_id: String,
        reason: String,
    },

    #[error("Job dispatch failed: {0}")]
    Dispatch(String),
}

impl PipelineError {
    /// Only pre-claim storage failures are retried by the worker.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::MessageNotFound(_) | Self::StageAborted { .. } | Self::Dispatch(_) => false,
        }
    }
}

/// Job queue errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job queue is closed")]
    QueueClosed,

    #[error("Unknown job kind: {0}")]
    UnknownKind(String),

    #[error("Job for message {message_id} timed out after {timeout:?}")]
    Timeout {
        message_id: String,
        timeout: Duration,
    },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
