use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use reelforge_core::service::rate_limit::{IdentityKind, LimitingWindow, QuotaStatus, Window};
use serde::{Deserialize, Serialize};

use super::{middleware::ClientIdentity, AppState};

/// 429 body naming the window that blocks the caller
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaExceededResponse {
    pub error: String,
    pub status: u16,
    pub identity: IdentityKind,
    pub window: Window,
    pub used: u32,
    pub limit: u32,
    pub reset_at: DateTime<Utc>,
    pub reset_in_secs: u64,
}

pub fn quota_exceeded(denied: &LimitingWindow) -> Response {
    let usage = &denied.usage;
    let body = QuotaExceededResponse {
        error: format!(
            "Generation limit reached: {} of {} per {}",
            usage.used,
            usage.limit,
            usage.window.as_str()
        ),
        status: StatusCode::TOO_MANY_REQUESTS.as_u16(),
        identity: denied.kind,
        window: usage.window,
        used: usage.used,
        limit: usage.limit,
        reset_at: usage.resets_at,
        reset_in_secs: usage.reset_in_secs,
    };

    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, usage.reset_in_secs.to_string())],
        Json(body),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatusResponse {
    pub backend: &'static str,
    pub allowed: bool,
    pub identities: Vec<QuotaStatus>,
}

/// GET /rate-limit-status
pub async fn rate_limit_status(
    State(state): State<AppState>,
    identity: ClientIdentity,
    Query(query): Query<StatusQuery>,
) -> Json<RateLimitStatusResponse> {
    let identity = identity.with_session(query.session_id.as_deref());
    let decision = state
        .rate_limiter
        .check_identities(&identity.ip, identity.session_str())
        .await;

    Json(RateLimitStatusResponse {
        backend: state.rate_limiter.backend(),
        allowed: decision.allowed,
        identities: decision.identities,
    })
}
