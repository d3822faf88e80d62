//! Health check endpoints
//!
//! Provides simple health check for monitoring probes.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::http::AppState;

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
}

/// Basic health check (always returns OK if server is running)
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

/// Reports the counter store. An unreachable store does not fail readiness,
/// since quota checks fail open.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let backend = state.rate_limiter.backend();
    let counters = match state.rate_limiter.health_check().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!(backend, error = %e, "Counter store health check failed");
            "degraded"
        }
    };

    (
        StatusCode::OK,
        Json(json!({
            "status": "ready",
            "rateLimitBackend": backend,
            "counters": counters,
        })),
    )
}
