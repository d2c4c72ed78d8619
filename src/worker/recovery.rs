//! Startup recovery and stuck-message reporting.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::DatabaseError;
use crate::pipeline::types::{Message, MessageStatus};
use crate::store::Database;
use crate::worker::job::{JobDispatcher, JobKind};

const RECOVERY_BATCH: usize = 1000;

/// Which job a pending message still needs.
fn next_job(message: &Message) -> JobKind {
    if message.screening_result.is_some() {
        JobKind::Process
    } else {
        JobKind::Screen
    }
}

/// Re-dispatch every eligible `pending` message.
///
/// Jobs live only in memory, so anything queued before a restart is
/// rebuilt from the store. Returns how many jobs were dispatched.
pub async fn recover_pending(
    store: &dyn Database,
    dispatcher: &dyn JobDispatcher,
) -> Result<usize, DatabaseError> {
    let pending = store
        .list_by_status(MessageStatus::Pending, RECOVERY_BATCH)
        .await?;

    let dispatches = pending
        .iter()
        .filter(|m| m.ai_eligible)
        .map(|m| async move {
            let kind = next_job(m);
            match dispatcher.dispatch(kind, &m.id).await {
                Ok(_) => true,
                Err(e) => {
                    warn!(message_id = %m.id, kind = %kind, error = %e, "Recovery dispatch failed");
                    false
                }
            }
        });
    let dispatched = futures::future::join_all(dispatches)
        .await
        .into_iter()
        .filter(|ok| *ok)
        .count();

    info!(pending = pending.len(), dispatched, "Pending messages recovered");
    Ok(dispatched)
}

/// Report messages that have sat in `screening` or `processing` longer
/// than `threshold`. Nothing is reset.
pub async fn sweep_stuck(
    store: &dyn Database,
    threshold: Duration,
) -> Result<Vec<Message>, DatabaseError> {
    let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(threshold)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
    let stuck = store.list_stuck(cutoff).await?;
    for message in &stuck {
        warn!(
            message_id = %message.id,
            status = %message.status,
            updated_at = %message.updated_at,
            "Message stuck in stage"
        );
    }
    Ok(stuck)
}

/// Run [`sweep_stuck`] every `interval` until the task is aborted.
pub fn spawn_stuck_sweep(
    store: Arc<dyn Database>,
    threshold: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_stuck(store.as_ref(), threshold).await {
                warn!(error = %e, "Stuck sweep failed");
            }
        }
    })
}
