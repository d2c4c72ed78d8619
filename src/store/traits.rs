//! `Database` trait: single async interface for message persistence.
//!
//! Every state change is one conditional UPDATE. Methods that return `bool`
//! report whether the guarded row changed; `false` means another worker or
//! an earlier delivery already moved the message on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::pipeline::types::{ExecutedAction, Message, MessageStatus, NewMessage, ScreeningResult};

#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Insert a new message as `pending` (eligible) or `not_eligible`.
    /// Fails with `Constraint` if the id already exists.
    async fn insert_message(&self, message: &NewMessage, ai_eligible: bool)
    -> Result<(), DatabaseError>;

    async fn get_message(&self, id: &str) -> Result<Option<Message>, DatabaseError>;

    /// Atomically move an eligible message from `pending` to `stage`
    /// (`screening` or `processing`), clearing `last_error`.
    async fn claim_message(&self, id: &str, stage: MessageStatus) -> Result<bool, DatabaseError>;

    /// Write the screening verdict. Write-once; requires `screening`.
    async fn record_screening(
        &self,
        id: &str,
        result: &ScreeningResult,
    ) -> Result<(), DatabaseError>;

    /// `screening → pending`, handing the message to full processing.
    async fn requeue_for_processing(&self, id: &str) -> Result<bool, DatabaseError>;

    /// Terminal success transition with response and action records.
    /// `analysis_response` is write-once.
    async fn finish(
        &self,
        id: &str,
        from: MessageStatus,
        to: MessageStatus,
        analysis_response: &str,
        executed_actions: &[ExecutedAction],
    ) -> Result<bool, DatabaseError>;

    /// `from → failed` with the error recorded.
    async fn fail(&self, id: &str, from: MessageStatus, error: &str)
    -> Result<bool, DatabaseError>;

    /// Any non-terminal status → `failed`. Used by the job failure handler.
    async fn force_fail(&self, id: &str, error: &str) -> Result<bool, DatabaseError>;

    /// `pending → skipped` with the reason in `last_error`.
    async fn skip_message(&self, id: &str, reason: &str) -> Result<bool, DatabaseError>;

    /// Set the local read flag after the provider confirmed it.
    async fn mark_read_locally(&self, id: &str) -> Result<(), DatabaseError>;

    /// Messages in `status`, oldest first.
    async fn list_by_status(
        &self,
        status: MessageStatus,
        limit: usize,
    ) -> Result<Vec<Message>, DatabaseError>;

    /// Messages held by a stage since before `cutoff`.
    async fn list_stuck(&self, cutoff: DateTime<Utc>) -> Result<Vec<Message>, DatabaseError>;

    /// Message count per status.
    async fn status_counts(&self) -> Result<Vec<(MessageStatus, i64)>, DatabaseError>;
}
