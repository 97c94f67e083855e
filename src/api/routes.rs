//! REST endpoints for ingestion and internal diagnostics.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::event::ConversationEvent;
use crate::ingest::ports::{EventStore, WorkQueue};
use crate::ingest::service::{AdmitOutcome, IngestionService};
use crate::normalize::{
    ChatPayload, PayloadError, SmsPayload, VoicePayload, normalize_chat, normalize_sms,
    normalize_voice,
};

/// Most dead-letter entries a single listing returns.
const DLQ_LIST_MAX: usize = 100;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingest: Arc<IngestionService>,
    pub events: Arc<dyn EventStore>,
    pub queue: Arc<dyn WorkQueue>,
    /// Gates the `/internal/*` diagnostics surface.
    pub internal_enabled: bool,
}

/// Build the Axum router for the gateway.
///
/// Ingest routes exist both versioned (`/v1/ingest/*`) and bare
/// (`/ingest/*`) for callers predating the versioned paths.
pub fn router(state: AppState, enable_cors: bool) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/v1/ingest/sms", post(ingest_sms))
        .route("/v1/ingest/chat", post(ingest_chat))
        .route("/v1/ingest/voice", post(ingest_voice))
        .route("/ingest/sms", post(ingest_sms))
        .route("/ingest/chat", post(ingest_chat))
        .route("/ingest/voice", post(ingest_voice))
        .route(
            "/internal/provider-events/{id}/count",
            get(provider_event_count),
        )
        .route("/internal/dlq", get(dlq_listing))
        .with_state(state);

    if enable_cors {
        router = router.layer(CorsLayer::permissive());
    }
    router
}

// ── Health ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "ingest-gateway"
    }))
}

// ── Ingestion ───────────────────────────────────────────────────────

/// A channel payload that can be checked and normalized.
trait IngestPayload: serde::de::DeserializeOwned {
    fn check(&self) -> Result<(), PayloadError>;
    fn into_event(self) -> ConversationEvent;
}

impl IngestPayload for SmsPayload {
    fn check(&self) -> Result<(), PayloadError> {
        self.validate()
    }
    fn into_event(self) -> ConversationEvent {
        normalize_sms(self)
    }
}

impl IngestPayload for ChatPayload {
    fn check(&self) -> Result<(), PayloadError> {
        self.validate()
    }
    fn into_event(self) -> ConversationEvent {
        normalize_chat(self)
    }
}

impl IngestPayload for VoicePayload {
    fn check(&self) -> Result<(), PayloadError> {
        self.validate()
    }
    fn into_event(self) -> ConversationEvent {
        normalize_voice(self)
    }
}

async fn ingest_sms(State(state): State<AppState>, Json(body): Json<serde_json::Value>) -> Response {
    ingest::<SmsPayload>(&state, body).await
}

async fn ingest_chat(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    ingest::<ChatPayload>(&state, body).await
}

async fn ingest_voice(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    ingest::<VoicePayload>(&state, body).await
}

/// Shared ingest flow: decode → validate → normalize → admit → status.
async fn ingest<P: IngestPayload>(state: &AppState, body: serde_json::Value) -> Response {
    let payload: P = match serde_json::from_value(body) {
        Ok(payload) => payload,
        Err(e) => {
            return validation_details(vec![serde_json::json!({
                "path": "body",
                "message": e.to_string(),
            })]);
        }
    };

    if let Err(e) = payload.check() {
        return validation_details(
            e.issues
                .iter()
                .map(|i| serde_json::json!({"path": i.path, "message": i.message}))
                .collect(),
        );
    }

    match state.ingest.admit(payload.into_event()).await {
        Ok(AdmitOutcome::Accepted { event_id }) => (
            StatusCode::CREATED,
            Json(serde_json::json!({"status": "accepted", "event_id": event_id})),
        )
            .into_response(),
        Ok(AdmitOutcome::Duplicate) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "duplicate"})),
        )
            .into_response(),
        Ok(AdmitOutcome::RateLimited) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({"error": "rate limit exceeded"})),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Admission failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "internal_error"})),
            )
                .into_response()
        }
    }
}

fn validation_details(details: Vec<serde_json::Value>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": "validation_error",
            "details": details,
        })),
    )
        .into_response()
}

// ── Internal diagnostics ────────────────────────────────────────────

fn internal_disabled() -> Response {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(serde_json::json!({"error": "not_implemented"})),
    )
        .into_response()
}

async fn provider_event_count(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    if !state.internal_enabled {
        return internal_disabled();
    }

    match state.events.count_by_provider_message_id(&id).await {
        Ok(count) => Json(serde_json::json!({
            "provider_message_id": id,
            "count": count,
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "Provider event count failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "internal_error"})),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
struct DlqQuery {
    limit: Option<usize>,
}

async fn dlq_listing(State(state): State<AppState>, Query(query): Query<DlqQuery>) -> Response {
    if !state.internal_enabled {
        return internal_disabled();
    }

    let limit = query.limit.unwrap_or(20).min(DLQ_LIST_MAX);
    match state.queue.dlq_entries(limit).await {
        Ok(entries) => Json(serde_json::json!({"entries": entries})).into_response(),
        Err(e) => {
            error!(error = %e, "DLQ listing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "internal_error"})),
            )
                .into_response()
        }
    }
}
