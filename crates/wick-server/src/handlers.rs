use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{LifecycleError, AppState};

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Create ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub payload: String,
    /// Time-to-live in minutes; fractional values are allowed.
    pub ttl_minutes: f64,
    /// Number of successful reads before the secret self-destructs.
    /// Zero is legal and yields an immediately unconsumable secret.
    pub view_budget: u32,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub handle: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub remaining_views: u32,
}

pub async fn create_secret(
    State(state): State<AppState>,
    Json(body): Json<CreateRequest>,
) -> Response {
    match state
        .lifecycle
        .create(body.payload, body.ttl_minutes, body.view_budget)
    {
        Ok(receipt) => {
            info!(
                handle = %receipt.handle,
                ttl_minutes = body.ttl_minutes,
                view_budget = body.view_budget,
                "secret created"
            );
            (
                StatusCode::CREATED,
                Json(CreateResponse {
                    handle: receipt.handle,
                    created_at: receipt.created_at,
                    expires_at: receipt.expires_at,
                    remaining_views: receipt.remaining_views,
                }),
            )
                .into_response()
        }
        Err(e) => lifecycle_error(e),
    }
}

// ── Consume ───────────────────────────────────────────────────────────────────

pub async fn consume_secret(State(state): State<AppState>, Path(handle): Path<String>) -> Response {
    match state.lifecycle.consume(&handle) {
        Ok(consumed) => {
            info!(%handle, remaining_views = consumed.remaining_views, "secret consumed");
            Json(json!({
                "handle": handle,
                "payload": consumed.payload,
                "created_at": consumed.created_at,
                "expires_at": consumed.expires_at,
                "remaining_views": consumed.remaining_views,
            }))
            .into_response()
        }
        Err(e) => lifecycle_error(e),
    }
}

// ── Prune ─────────────────────────────────────────────────────────────────────

pub async fn prune_secrets(State(state): State<AppState>) -> Response {
    let now = state.lifecycle.now_millis();
    match state.lifecycle.store().prune(now) {
        Ok(pruned) => Json(json!({"pruned": pruned.len()})).into_response(),
        Err(e) => internal_error(e),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Map a lifecycle outcome to an HTTP status. Expiry and exhaustion are both
/// 410: the record existed but can never be read again.
fn lifecycle_error(e: LifecycleError) -> Response {
    let (status, message) = match e {
        LifecycleError::NotFound => (StatusCode::NOT_FOUND, "not found".to_owned()),
        LifecycleError::Expired => (StatusCode::GONE, "secret has expired".to_owned()),
        LifecycleError::Exhausted => (StatusCode::GONE, "view budget exhausted".to_owned()),
        LifecycleError::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, msg),
        LifecycleError::Storage(err) => return internal_error(err),
    };
    (status, Json(json!({"error": message}))).into_response()
}

fn internal_error(e: anyhow::Error) -> Response {
    tracing::error!(error = %e, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal server error"})),
    )
        .into_response()
}
