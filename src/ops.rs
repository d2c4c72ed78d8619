//! Operator HTTP routes: hand over a message, run a stage, inspect or skip
//! a message, health.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::error::{DatabaseError, JobError, PipelineError};
use crate::pipeline::types::NewMessage;
use crate::pipeline::{EligibilityPolicy, MessageIntake};
use crate::store::Database;
use crate::worker::{JobDispatcher, JobKind};

const DEFAULT_SKIP_REASON: &str = "Skipped by operator";

/// State shared across handlers.
#[derive(Clone)]
pub struct OpsState {
    pub store: Arc<dyn Database>,
    pub dispatcher: Arc<dyn JobDispatcher>,
    pub intake: Arc<MessageIntake>,
}

/// Build the ops router.
pub fn ops_routes(store: Arc<dyn Database>, dispatcher: Arc<dyn JobDispatcher>) -> Router {
    let intake = Arc::new(MessageIntake::new(Arc::clone(&store), Arc::clone(&dispatcher)));
    let state = OpsState {
        store,
        dispatcher,
        intake,
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/jobs/{kind}/{message_id}", post(enqueue_job))
        .route("/api/messages", post(accept_message))
        .route("/api/messages/{id}", get(get_message))
        .route("/api/messages/{id}/skip", post(skip_message))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<OpsState>) -> impl IntoResponse {
    match state.store.status_counts().await {
        Ok(counts) => {
            let counts: serde_json::Map<String, serde_json::Value> = counts
                .into_iter()
                .map(|(status, n)| (status.to_string(), json!(n)))
                .collect();
            Json(json!({
                "status": "ok",
                "service": "mail-triage",
                "messages": counts,
            }))
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "Health check could not read status counts");
            error_body(StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
        }
    }
}

// ── Jobs ────────────────────────────────────────────────────────────────

async fn enqueue_job(
    State(state): State<OpsState>,
    Path((kind, message_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let kind: JobKind = match kind.parse() {
        Ok(kind) => kind,
        Err(e) => return error_body(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match state.store.get_message(&message_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return error_body(StatusCode::NOT_FOUND, "Message not found"),
        Err(e) => {
            error!(message_id = %message_id, error = %e, "Job enqueue lookup failed");
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    }

    match state.dispatcher.dispatch(kind, &message_id).await {
        Ok(job_id) => {
            info!(message_id = %message_id, kind = %kind, job_id = %job_id, "Job enqueued by operator");
            (
                StatusCode::ACCEPTED,
                Json(json!({
                    "job_id": job_id,
                    "kind": kind,
                    "message_id": message_id,
                })),
            )
                .into_response()
        }
        Err(JobError::QueueClosed) => error_body(StatusCode::SERVICE_UNAVAILABLE, "Job queue is closed"),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ── Messages ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct IntakeRequest {
    #[serde(flatten)]
    message: NewMessage,
    /// Use the backfill window instead of the regular sync window.
    #[serde(default)]
    backfill: bool,
}

async fn accept_message(
    State(state): State<OpsState>,
    Json(body): Json<IntakeRequest>,
) -> impl IntoResponse {
    let policy = if body.backfill {
        EligibilityPolicy::backfill()
    } else {
        EligibilityPolicy::sync()
    };
    let id = body.message.id.clone();

    match state.intake.accept_with_policy(body.message, &policy).await {
        Ok(eligible) => (
            StatusCode::CREATED,
            Json(json!({ "message_id": id, "ai_eligible": eligible })),
        )
            .into_response(),
        Err(PipelineError::Storage(DatabaseError::Constraint(_))) => {
            warn!(message_id = %id, "Intake refused, message already exists");
            error_body(StatusCode::CONFLICT, "Message already exists")
        }
        Err(e) => {
            error!(message_id = %id, error = %e, "Intake failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn get_message(State(state): State<OpsState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.get_message(&id).await {
        Ok(Some(message)) => (StatusCode::OK, Json(json!(message))).into_response(),
        Ok(None) => error_body(StatusCode::NOT_FOUND, "Message not found"),
        Err(e) => {
            error!(message_id = %id, error = %e, "Message lookup failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SkipRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn skip_message(
    State(state): State<OpsState>,
    Path(id): Path<String>,
    Json(body): Json<SkipRequest>,
) -> impl IntoResponse {
    let reason = body
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SKIP_REASON.to_string());

    match state.store.skip_message(&id, &reason).await {
        Ok(true) => {
            info!(message_id = %id, reason = %reason, "Message skipped");
            (StatusCode::OK, Json(json!({ "status": "skipped" }))).into_response()
        }
        Ok(false) => match state.store.get_message(&id).await {
            Ok(Some(message)) => {
                warn!(message_id = %id, status = %message.status, "Skip refused, message not pending");
                error_body(
                    StatusCode::CONFLICT,
                    format!("Message is {}, only pending messages can be skipped", message.status),
                )
            }
            Ok(None) => error_body(StatusCode::NOT_FOUND, "Message not found"),
            Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        Err(e) => {
            error!(message_id = %id, error = %e, "Skip failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::pipeline::types::MessageStatus;
    use crate::store::LibSqlBackend;
    use crate::worker::job::tests::RecordingDispatcher;

    async fn setup() -> (Router, Arc<LibSqlBackend>, Arc<RecordingDispatcher>) {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        store
            .insert_message(&NewMessage::fixture("m1", "Hi", ""), true)
            .await
            .unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let router = ops_routes(store.clone(), dispatcher.clone());
        (router, store, dispatcher)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn enqueue_dispatches_named_job() {
        let (router, _, dispatcher) = setup().await;
        let response = router
            .oneshot(post_json("/api/jobs/screen/m1", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["kind"], "screen");
        assert_eq!(
            *dispatcher.jobs.lock().await,
            vec![(JobKind::Screen, "m1".to_string())]
        );
    }

    #[tokio::test]
    async fn enqueue_rejects_unknown_kind_and_message() {
        let (router, _, dispatcher) = setup().await;
        let response = router
            .clone()
            .oneshot(post_json("/api/jobs/rescan/m1", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(post_json("/api/jobs/process/nope", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(dispatcher.jobs.lock().await.is_empty());
    }

    #[tokio::test]
    async fn intake_route_persists_and_dispatches_screening() {
        let (router, store, dispatcher) = setup().await;
        let mut fresh = serde_json::to_value(NewMessage::fixture("m2", "Contract", "Sign?")).unwrap();
        let mut automated =
            serde_json::to_value(NewMessage::fixture("m3", "Weekly newsletter", "")).unwrap();
        fresh["backfill"] = json!(false);
        automated["backfill"] = json!(true);

        let response = router.clone().oneshot(post_json("/api/messages", fresh)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_json(response).await["ai_eligible"], true);

        let response = router
            .clone()
            .oneshot(post_json("/api/messages", automated))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["ai_eligible"], false);
        let m3 = store.get_message("m3").await.unwrap().unwrap();
        assert_eq!(m3.status, MessageStatus::NotEligible);

        assert_eq!(
            *dispatcher.jobs.lock().await,
            vec![(JobKind::Screen, "m2".to_string())]
        );

        let duplicate = serde_json::to_value(NewMessage::fixture("m1", "Hi", "")).unwrap();
        let response = router.oneshot(post_json("/api/messages", duplicate)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn get_message_returns_state() {
        let (router, _, _) = setup().await;
        let response = router
            .clone()
            .oneshot(Request::get("/api/messages/m1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "pending");
        assert_eq!(body["ai_eligible"], true);

        let response = router
            .oneshot(Request::get("/api/messages/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn skip_only_applies_to_pending() {
        let (router, store, _) = setup().await;
        let response = router
            .clone()
            .oneshot(post_json("/api/messages/m1/skip", json!({"reason": "handled by phone"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let msg = store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Skipped);
        assert_eq!(msg.last_error.as_deref(), Some("handled by phone"));

        let response = router
            .oneshot(post_json("/api/messages/m1/skip", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn health_reports_status_counts() {
        let (router, _, _) = setup().await;
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["messages"]["pending"], 1);
    }
}
