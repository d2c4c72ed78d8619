//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. State transitions are
//! single conditional UPDATEs; the affected-row count decides who won.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::types::{
    BodyFormat, ExecutedAction, Message, MessageStatus, NewMessage, ScreeningResult,
};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_messages(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Vec<Message>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            match row_to_message(&row) {
                Ok(msg) => messages.push(msg),
                Err(e) => tracing::warn!("Skipping message row: {e}"),
            }
        }
        Ok(messages)
    }

    /// Explain why a guarded write-once update touched no row.
    async fn write_once_noop(
        &self,
        id: &str,
        field: &'static str,
        already_set: impl Fn(&Message) -> bool,
        expected: MessageStatus,
        target: &str,
    ) -> DatabaseError {
        match self.get_message(id).await {
            Ok(Some(msg)) if already_set(&msg) => DatabaseError::WriteOnce {
                id: id.to_string(),
                field,
            },
            Ok(Some(msg)) => DatabaseError::InvalidTransition {
                id: id.to_string(),
                from: msg.status.to_string(),
                to: format!("{target} (requires {expected})"),
            },
            Ok(None) => DatabaseError::NotFound {
                entity: "message".to_string(),
                id: id.to_string(),
            },
            Err(e) => e,
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format. Fixed width, so text comparison orders correctly.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn now() -> String {
    ts(Utc::now())
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

const MESSAGE_COLUMNS: &str = "id, external_id, subject, sender_name, sender_address, \
     preview_text, body_text, body_format, received_at, is_read, has_attachments, ai_eligible, \
     status, screening_result, screening_completed_at, analysis_response, executed_actions, \
     last_error, processed_at, created_at, updated_at";

/// Statuses a stage or the queue may still act on.
const NON_TERMINAL: &str = "('pending', 'screening', 'processing')";

/// Map a libsql Row to a Message.
///
/// Column order matches MESSAGE_COLUMNS.
fn row_to_message(row: &libsql::Row) -> Result<Message, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));

    let status_str: String = row.get(12).map_err(get_err)?;
    let status: MessageStatus = status_str
        .parse()
        .map_err(DatabaseError::Serialization)?;

    let screening_result = match row.get::<String>(13).ok() {
        Some(json) => Some(
            serde_json::from_str::<ScreeningResult>(&json)
                .map_err(|e| DatabaseError::Serialization(format!("screening_result: {e}")))?,
        ),
        None => None,
    };

    let actions_json: String = row.get::<String>(16).unwrap_or_else(|_| "[]".into());
    let executed_actions: Vec<ExecutedAction> = serde_json::from_str(&actions_json)
        .map_err(|e| DatabaseError::Serialization(format!("executed_actions: {e}")))?;

    let received_str: String = row.get(8).map_err(get_err)?;
    let created_str: String = row.get(19).map_err(get_err)?;
    let updated_str: String = row.get(20).map_err(get_err)?;
    let body_format: String = row.get(7).map_err(get_err)?;

    Ok(Message {
        id: row.get(0).map_err(get_err)?,
        external_id: row.get(1).map_err(get_err)?,
        subject: row.get(2).map_err(get_err)?,
        sender_name: row.get(3).map_err(get_err)?,
        sender_address: row.get(4).map_err(get_err)?,
        preview_text: row.get(5).map_err(get_err)?,
        body_text: row.get(6).map_err(get_err)?,
        body_format: BodyFormat::parse(&body_format),
        received_at: parse_datetime(&received_str),
        is_read: row.get::<i64>(9).map_err(get_err)? != 0,
        has_attachments: row.get::<i64>(10).map_err(get_err)? != 0,
        ai_eligible: row.get::<i64>(11).map_err(get_err)? != 0,
        status,
        screening_result,
        screening_completed_at: parse_optional_datetime(&row.get::<String>(14).ok()),
        analysis_response: row.get::<String>(15).ok(),
        executed_actions,
        last_error: row.get::<String>(17).ok(),
        processed_at: parse_optional_datetime(&row.get::<String>(18).ok()),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn insert_message(
        &self,
        message: &NewMessage,
        ai_eligible: bool,
    ) -> Result<(), DatabaseError> {
        let status = if ai_eligible {
            MessageStatus::Pending
        } else {
            MessageStatus::NotEligible
        };
        let now = now();
        self.conn()
            .execute(
                "INSERT INTO messages (id, external_id, subject, sender_name, sender_address,
                    preview_text, body_text, body_format, received_at, is_read, has_attachments,
                    ai_eligible, status, executed_actions, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, '[]', ?14, ?14)",
                params![
                    message.id.as_str(),
                    message.external_id.as_str(),
                    message.subject.as_str(),
                    message.sender_name.as_str(),
                    message.sender_address.as_str(),
                    message.preview_text.as_str(),
                    message.body_text.as_str(),
                    message.body_format.as_str(),
                    ts(message.received_at),
                    i64::from(message.is_read),
                    i64::from(message.has_attachments),
                    i64::from(ai_eligible),
                    status.as_str(),
                    now,
                ],
            )
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("UNIQUE") || msg.contains("constraint") {
                    DatabaseError::Constraint(format!("insert_message {}: {msg}", message.id))
                } else {
                    DatabaseError::Query(format!("insert_message: {msg}"))
                }
            })?;

        debug!(id = %message.id, status = %status, "Message inserted into DB");
        Ok(())
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_message(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_message: {e}"))),
        }
    }

    async fn claim_message(&self, id: &str, stage: MessageStatus) -> Result<bool, DatabaseError> {
        if !matches!(stage, MessageStatus::Screening | MessageStatus::Processing) {
            return Err(DatabaseError::InvalidTransition {
                id: id.to_string(),
                from: MessageStatus::Pending.to_string(),
                to: stage.to_string(),
            });
        }
        let count = self
            .conn()
            .execute(
                "UPDATE messages SET status = ?1, last_error = NULL, updated_at = ?2
                 WHERE id = ?3 AND status = 'pending' AND ai_eligible = 1",
                params![stage.as_str(), now(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_message: {e}")))?;

        debug!(id, stage = %stage, claimed = count == 1, "Claim attempted");
        Ok(count == 1)
    }

    async fn record_screening(
        &self,
        id: &str,
        result: &ScreeningResult,
    ) -> Result<(), DatabaseError> {
        let json = serde_json::to_string(result)
            .map_err(|e| DatabaseError::Serialization(format!("screening_result: {e}")))?;
        let now = now();
        let count = self
            .conn()
            .execute(
                "UPDATE messages SET screening_result = ?1, screening_completed_at = ?2, updated_at = ?2
                 WHERE id = ?3 AND status = 'screening' AND screening_result IS NULL",
                params![json, now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_screening: {e}")))?;

        if count == 1 {
            return Ok(());
        }
        Err(self
            .write_once_noop(
                id,
                "screening_result",
                |m| m.screening_result.is_some(),
                MessageStatus::Screening,
                "record_screening",
            )
            .await)
    }

    async fn requeue_for_processing(&self, id: &str) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE messages SET status = 'pending', updated_at = ?1
                 WHERE id = ?2 AND status = 'screening' AND screening_result IS NOT NULL",
                params![now(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("requeue_for_processing: {e}")))?;
        Ok(count == 1)
    }

    async fn finish(
        &self,
        id: &str,
        from: MessageStatus,
        to: MessageStatus,
        analysis_response: &str,
        executed_actions: &[ExecutedAction],
    ) -> Result<bool, DatabaseError> {
        if !from.can_transition_to(to) || !to.is_terminal() {
            return Err(DatabaseError::InvalidTransition {
                id: id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        let actions = serde_json::to_string(executed_actions)
            .map_err(|e| DatabaseError::Serialization(format!("executed_actions: {e}")))?;
        let now = now();
        let count = self
            .conn()
            .execute(
                "UPDATE messages SET status = ?1, analysis_response = ?2, executed_actions = ?3,
                    last_error = NULL, processed_at = ?4, updated_at = ?4
                 WHERE id = ?5 AND status = ?6 AND analysis_response IS NULL",
                params![to.as_str(), analysis_response, actions, now, id, from.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("finish: {e}")))?;

        if count == 1 {
            info!(id, status = %to, actions = executed_actions.len(), "Message reached terminal state");
            return Ok(true);
        }
        match self
            .write_once_noop(id, "analysis_response", |m| m.analysis_response.is_some(), from, to.as_str())
            .await
        {
            DatabaseError::InvalidTransition { .. } => Ok(false),
            other => Err(other),
        }
    }

    async fn fail(
        &self,
        id: &str,
        from: MessageStatus,
        error: &str,
    ) -> Result<bool, DatabaseError> {
        if !from.can_transition_to(MessageStatus::Failed) {
            return Err(DatabaseError::InvalidTransition {
                id: id.to_string(),
                from: from.to_string(),
                to: MessageStatus::Failed.to_string(),
            });
        }
        let now = now();
        let count = self
            .conn()
            .execute(
                "UPDATE messages SET status = 'failed', last_error = ?1, processed_at = ?2, updated_at = ?2
                 WHERE id = ?3 AND status = ?4",
                params![error, now, id, from.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("fail: {e}")))?;

        if count == 1 {
            info!(id, from = %from, error, "Message failed");
        }
        Ok(count == 1)
    }

    async fn force_fail(&self, id: &str, error: &str) -> Result<bool, DatabaseError> {
        let now = now();
        let count = self
            .conn()
            .execute(
                &format!(
                    "UPDATE messages SET status = 'failed', last_error = ?1, processed_at = ?2, updated_at = ?2
                     WHERE id = ?3 AND status IN {NON_TERMINAL}"
                ),
                params![error, now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("force_fail: {e}")))?;

        if count == 1 {
            info!(id, error, "Message force-failed");
        }
        Ok(count == 1)
    }

    async fn skip_message(&self, id: &str, reason: &str) -> Result<bool, DatabaseError> {
        let now = now();
        let count = self
            .conn()
            .execute(
                "UPDATE messages SET status = 'skipped', last_error = ?1, processed_at = ?2, updated_at = ?2
                 WHERE id = ?3 AND status = 'pending'",
                params![reason, now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("skip_message: {e}")))?;
        Ok(count == 1)
    }

    async fn mark_read_locally(&self, id: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE messages SET is_read = 1, updated_at = ?1 WHERE id = ?2",
                params![now(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_read_locally: {e}")))?;
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: MessageStatus,
        limit: usize,
    ) -> Result<Vec<Message>, DatabaseError> {
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE status = ?1 ORDER BY received_at ASC LIMIT ?2"
            ),
            params![status.as_str(), limit as i64],
            "list_by_status",
        )
        .await
    }

    async fn list_stuck(&self, cutoff: DateTime<Utc>) -> Result<Vec<Message>, DatabaseError> {
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE status IN ('screening', 'processing') AND updated_at < ?1
                 ORDER BY updated_at ASC"
            ),
            params![ts(cutoff)],
            "list_stuck",
        )
        .await
    }

    async fn status_counts(&self) -> Result<Vec<(MessageStatus, i64)>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT status, COUNT(*) FROM messages GROUP BY status ORDER BY status",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("status_counts: {e}")))?;

        let mut counts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("status_counts: {e}")))?
        {
            let status: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("status_counts: {e}")))?;
            let count: i64 = row.get(1).unwrap_or(0);
            match status.parse::<MessageStatus>() {
                Ok(s) => counts.push((s, count)),
                Err(e) => tracing::warn!("Skipping status row: {e}"),
            }
        }
        Ok(counts)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
