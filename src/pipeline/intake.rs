//! Entry point mail sync uses to hand over new messages.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::error::PipelineError;
use crate::pipeline::types::NewMessage;
use crate::store::Database;
use crate::worker::{JobDispatcher, JobKind};

const AUTOMATED_SUBJECT_MARKERS: &[&str] = &["newsletter", "notification", "no-reply"];
const AUTOMATED_SENDER_MARKERS: &[&str] = &["noreply", "no-reply"];

/// Rules for deciding whether a message enters the AI pipeline.
///
/// The regular sync and the backfill command use different windows;
/// callers pick a preset explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityPolicy {
    pub max_age: Duration,
    pub unread_only: bool,
}

impl EligibilityPolicy {
    /// Regular sync: received in the last 2 days, not automated.
    pub fn sync() -> Self {
        Self {
            max_age: Duration::days(2),
            unread_only: false,
        }
    }

    /// Backfill: received in the last 7 days, unread, not automated.
    pub fn backfill() -> Self {
        Self {
            max_age: Duration::days(7),
            unread_only: true,
        }
    }

    pub fn is_eligible(&self, message: &NewMessage, now: DateTime<Utc>) -> bool {
        let recent = message.received_at > now - self.max_age;
        let unread_ok = !self.unread_only || !message.is_read;
        recent && unread_ok && !is_automated(message)
    }
}

/// Newsletters, notifications and no-reply senders.
pub fn is_automated(message: &NewMessage) -> bool {
    let subject = message.subject.to_lowercase();
    let sender = message.sender_address.to_lowercase();
    AUTOMATED_SUBJECT_MARKERS.iter().any(|m| subject.contains(m))
        || AUTOMATED_SENDER_MARKERS.iter().any(|m| sender.contains(m))
}

/// Persists new messages and starts screening for eligible ones.
pub struct MessageIntake {
    store: Arc<dyn Database>,
    dispatcher: Arc<dyn JobDispatcher>,
}

impl MessageIntake {
    pub fn new(store: Arc<dyn Database>, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Store `message` with the caller's eligibility decision.
    ///
    /// Eligible messages get a `screen` job. If dispatch fails the message
    /// stays `pending` and is picked up by startup recovery.
    pub async fn accept(&self, message: NewMessage, eligible: bool) -> Result<(), PipelineError> {
        self.store.insert_message(&message, eligible).await?;
        info!(message_id = %message.id, eligible, subject = %message.subject, "Message accepted");

        if eligible {
            self.dispatcher
                .dispatch(JobKind::Screen, &message.id)
                .await
                .map_err(|e| PipelineError::Dispatch(e.to_string()))?;
        }
        Ok(())
    }

    /// Evaluate `policy` and accept.
    pub async fn accept_with_policy(
        &self,
        message: NewMessage,
        policy: &EligibilityPolicy,
    ) -> Result<bool, PipelineError> {
        let eligible = policy.is_eligible(&message, Utc::now());
        self.accept(message, eligible).await?;
        Ok(eligible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DatabaseError, JobError};
    use crate::pipeline::types::MessageStatus;
    use crate::store::LibSqlBackend;
    use crate::worker::job::tests::RecordingDispatcher;
    use async_trait::async_trait;
    use uuid::Uuid;

    fn aged(days: i64) -> NewMessage {
        let mut msg = NewMessage::fixture("m1", "Contract renewal", "");
        msg.received_at = Utc::now() - Duration::days(days);
        msg
    }

    #[test]
    fn automated_detection() {
        let mut msg = NewMessage::fixture("m1", "Weekly Newsletter", "");
        assert!(is_automated(&msg));
        msg.subject = "Invoice".into();
        assert!(!is_automated(&msg));
        msg.sender_address = "NoReply@shop.example".into();
        assert!(is_automated(&msg));
    }

    #[test]
    fn presets_differ_in_window_and_read_state() {
        let now = Utc::now();
        let three_days = aged(3);
        assert!(!EligibilityPolicy::sync().is_eligible(&three_days, now));
        assert!(EligibilityPolicy::backfill().is_eligible(&three_days, now));

        let mut read = aged(1);
        read.is_read = true;
        assert!(EligibilityPolicy::sync().is_eligible(&read, now));
        assert!(!EligibilityPolicy::backfill().is_eligible(&read, now));
    }

    #[tokio::test]
    async fn eligible_message_is_queued_for_screening() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let intake = MessageIntake::new(store.clone(), dispatcher.clone());

        intake
            .accept(NewMessage::fixture("m1", "Hi", ""), true)
            .await
            .unwrap();
        intake
            .accept(NewMessage::fixture("m2", "Hi", ""), false)
            .await
            .unwrap();

        assert_eq!(
            *dispatcher.jobs.lock().await,
            vec![(JobKind::Screen, "m1".to_string())]
        );
        let m2 = store.get_message("m2").await.unwrap().unwrap();
        assert_eq!(m2.status, MessageStatus::NotEligible);
        assert!(!m2.ai_eligible);
    }

    #[tokio::test]
    async fn duplicate_is_rejected_without_dispatch() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let intake = MessageIntake::new(store, dispatcher.clone());

        intake
            .accept(NewMessage::fixture("m1", "Hi", ""), true)
            .await
            .unwrap();
        let err = intake
            .accept(NewMessage::fixture("m1", "Hi", ""), true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Storage(DatabaseError::Constraint(_))
        ));
        assert_eq!(dispatcher.jobs.lock().await.len(), 1);
    }

    struct ClosedQueue;

    #[async_trait]
    impl JobDispatcher for ClosedQueue {
        async fn dispatch(&self, _kind: JobKind, _message_id: &str) -> Result<Uuid, JobError> {
            Err(JobError::QueueClosed)
        }
    }

    #[tokio::test]
    async fn dispatch_failure_leaves_message_pending() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let intake = MessageIntake::new(store.clone(), Arc::new(ClosedQueue));

        let err = intake
            .accept_with_policy(aged(0), &EligibilityPolicy::sync())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Dispatch(_)));
        let msg = store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Pending);
    }
}
