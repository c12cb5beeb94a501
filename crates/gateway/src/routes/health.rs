use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// `GET /api/v1/health` — unauthenticated. Proof of life only; no
/// dependency status here, the lifecycle's `health_check` is the one
/// that gates readiness.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let _ = &state;
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
