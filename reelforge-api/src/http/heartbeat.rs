use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use reelforge_core::models::SessionId;
use serde::{Deserialize, Serialize};

use super::{
    error::{AppError, AppResult},
    AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub leaving: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub ok: bool,
    pub session_id: SessionId,
}

/// POST /heartbeat
///
/// Idempotent upsert of session liveness. `leaving: true` (sent on page
/// unload) hands the session to the next sweep.
pub async fn heartbeat(
    State(state): State<AppState>,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> AppResult<Json<HeartbeatResponse>> {
    let Json(body) = payload.map_err(|e| AppError::bad_request(e.body_text()))?;
    let session_id = body.session_id.trim();
    if session_id.is_empty() {
        return Err(AppError::bad_request("sessionId is required"));
    }

    let session_id = SessionId::from(session_id);
    state.lifecycle.sessions().heartbeat(&session_id, body.leaving);
    if body.leaving {
        tracing::debug!(session_id = %session_id, "Session leaving");
    }

    Ok(Json(HeartbeatResponse {
        ok: true,
        session_id,
    }))
}
