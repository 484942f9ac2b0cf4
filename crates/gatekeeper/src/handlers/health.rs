//! Health check handlers.
//!
//! Liveness and readiness probes. Readiness means the key source holds at
//! least one verification key.

use crate::routes::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Readiness response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// "ready" or "not_ready".
    pub status: String,

    /// Number of cached verification keys.
    pub jwks_keys: usize,
}

/// Handler for GET /health
///
/// Liveness only; always 200 while the process serves requests.
#[instrument(skip_all, name = "gatekeeper.health.live")]
pub async fn health_check() -> &'static str {
    "OK"
}

/// Handler for GET /ready
///
/// ## Response
///
/// - 200 with `{"status": "ready", "jwks_keys": N}` when keys are cached
/// - 503 with `{"status": "not_ready", "jwks_keys": 0}` otherwise
#[instrument(skip_all, name = "gatekeeper.health.ready")]
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let jwks_keys = state.key_source.key_count().await;

    if jwks_keys > 0 {
        (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready".to_string(),
                jwks_keys,
            }),
        )
    } else {
        tracing::warn!(target: "gatekeeper.health", "Not ready: key cache is empty");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready".to_string(),
                jwks_keys,
            }),
        )
    }
}
