//! Named pipeline jobs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;

/// Which stage a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Screen,
    Process,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Screen => "screen",
            Self::Process => "process",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "screen" => Ok(Self::Screen),
            "process" => Ok(Self::Process),
            other => Err(JobError::UnknownKind(other.to_string())),
        }
    }
}

/// One unit of queued work, keyed by message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub message_id: String,
}

impl Job {
    pub fn new(kind: JobKind, message_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message_id: message_id.into(),
        }
    }
}

/// Hands jobs to the worker pool.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, kind: JobKind, message_id: &str) -> Result<Uuid, JobError>;
}
