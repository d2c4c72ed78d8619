//! Execution of the model's suggested mailbox actions.

use std::sync::Arc;

use crate::pipeline::types::{ActionStatus, ExecutedAction, Message, SuggestedAction};
use crate::services::MailProvider;
use crate::store::Database;

const NO_REASON: &str = "No reason provided";

/// Runs suggested actions against the mail provider and local store.
pub struct ActionExecutor {
    mail: Arc<dyn MailProvider>,
    store: Arc<dyn Database>,
}

impl ActionExecutor {
    pub fn new(mail: Arc<dyn MailProvider>, store: Arc<dyn Database>) -> Self {
        Self { mail, store }
    }

    /// Execute every action flagged `execute`, in order.
    ///
    /// A failing action produces a `failed` record and does not stop the rest.
    pub async fn execute_all(
        &self,
        message: &Message,
        actions: &[SuggestedAction],
    ) -> Vec<ExecutedAction> {
        let mut records = Vec::new();
        let mut is_read = message.is_read;

        for suggested in actions.iter().filter(|a| a.execute) {
            let reason = suggested
                .reason
                .as_deref()
                .filter(|r| !r.trim().is_empty())
                .unwrap_or(NO_REASON)
                .to_string();

            let record = match suggested.action.as_str() {
                "mark_read" => {
                    if is_read {
                        tracing::debug!(message_id = %message.id, "Already read, skipping mark_read");
                        None
                    } else {
                        let record = self.mark_read(message, reason).await;
                        if record.status() == ActionStatus::Success {
                            is_read = true;
                        }
                        Some(record)
                    }
                }
                "mark_important" => Some(logged("mark_important", reason)),
                "create_task" => {
                    tracing::info!(message_id = %message.id, subject = %message.subject, reason = %reason, "Task suggested");
                    Some(logged("create_task", reason))
                }
                "schedule_reply" => {
                    tracing::info!(message_id = %message.id, subject = %message.subject, reason = %reason, "Reply suggested");
                    Some(logged("schedule_reply", reason))
                }
                "flag_spam" => {
                    tracing::warn!(
                        message_id = %message.id,
                        subject = %message.subject,
                        from = %message.sender_address,
                        reason = %reason,
                        "Potential spam flagged"
                    );
                    Some(logged("flag_spam", reason))
                }
                other => {
                    tracing::info!(message_id = %message.id, action = other, reason = %reason, "Unknown action suggested, ignoring");
                    None
                }
            };

            if let Some(record) = record {
                tracing::info!(
                    message_id = %message.id,
                    action = %suggested.action,
                    status = ?record.status(),
                    "Action executed"
                );
                records.push(record);
            }
        }

        records
    }

    async fn mark_read(&self, message: &Message, reason: String) -> ExecutedAction {
        if let Err(e) = self.mail.mark_as_read(&message.external_id).await {
            return failed("mark_read", reason, e.to_string());
        }
        // Provider side is done; the record stays a success.
        if let Err(e) = self.store.mark_read_locally(&message.id).await {
            tracing::warn!(message_id = %message.id, error = %e, "Failed to record read flag locally");
        }
        ExecutedAction::Action {
            action: "mark_read".to_string(),
            status: ActionStatus::Success,
            reason,
            error: None,
        }
    }
}

fn logged(action: &str, reason: String) -> ExecutedAction {
    ExecutedAction::Action {
        action: action.to_string(),
        status: ActionStatus::Logged,
        reason,
        error: None,
    }
}

fn failed(action: &str, reason: String, error: String) -> ExecutedAction {
    ExecutedAction::Action {
        action: action.to_string(),
        status: ActionStatus::Failed,
        reason,
        error: Some(error),
    }
}
