//! Message state machine.

use serde::{Deserialize, Serialize};

/// Pipeline status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Intake decided the message is not for the pipeline.
    NotEligible,
    /// Waiting for the next stage to claim it.
    Pending,
    /// Claimed by the screening stage.
    Screening,
    /// Claimed by the full-processing stage.
    Processing,
    /// Screening decided no full analysis is needed.
    ScreenedOnly,
    /// Full processing finished.
    Completed,
    Failed,
    /// Skipped by an operator before any stage ran.
    Skipped,
}

impl MessageStatus {
    /// Check if this state allows transitioning to another state.
    ///
    /// Nothing transitions into `NotEligible`; only intake assigns it.
    pub fn can_transition_to(&self, target: MessageStatus) -> bool {
        use MessageStatus::*;

        matches!(
            (self, target),
            // From Pending
            (Pending, Screening) | (Pending, Processing) | (Pending, Skipped) |
            // From Screening
            (Screening, Pending) | (Screening, ScreenedOnly) | (Screening, Failed) |
            // From Processing
            (Processing, Completed) | (Processing, Failed)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NotEligible | Self::ScreenedOnly | Self::Completed | Self::Failed | Self::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotEligible => "not_eligible",
            Self::Pending => "pending",
            Self::Screening => "screening",
            Self::Processing => "processing",
            Self::ScreenedOnly => "screened_only",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub const ALL: [MessageStatus; 8] = [
        Self::NotEligible,
        Self::Pending,
        Self::Screening,
        Self::Processing,
        Self::ScreenedOnly,
        Self::Completed,
        Self::Failed,
        Self::Skipped,
    ];
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown message status: '{s}'"))
    }
}
