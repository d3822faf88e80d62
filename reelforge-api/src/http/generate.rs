//! Generation requests
//!
//! Validation and quota checks run before a job exists. Once both pass, the
//! job is recorded, composition is started in the background, and the job id
//! is returned for polling.

use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    Json,
};
use reelforge_core::{
    media::{CanvasSize, CompositionRequest},
    models::{AvatarPlacement, JobId, JobResult},
};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use super::{
    error::{AppError, AppResult},
    middleware::ClientIdentity,
    rate_limit::quota_exceeded,
    AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub session_id: Option<String>,
    /// Upload references, relative to the uploads directory, in display order
    #[serde(default)]
    pub media: Vec<String>,
    pub audio: Option<String>,
    #[serde(default)]
    pub settings: GenerateSettings,
    #[serde(default)]
    pub avatars: Vec<AvatarRequest>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateSettings {
    pub duration: Option<f64>,
    pub fps: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarRequest {
    pub character: String,
    pub slide_index: usize,
    /// Horizontal center, percent of the visible photo
    pub x: f64,
    /// Vertical center, percent of the visible photo
    pub y: f64,
    pub scale: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub job_id: JobId,
}

/// POST /generate
pub async fn generate(
    State(state): State<AppState>,
    identity: ClientIdentity,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(body) = payload.map_err(|e| AppError::bad_request(e.body_text()))?;
    let identity = identity.with_session(body.session_id.as_deref());

    let mut request = composition_request(&state, &body)?;
    state.compositor.validate(&request)?;

    // Counts against every window in the same step as the check.
    let decision = state
        .rate_limiter
        .check_and_reserve(&identity.ip, identity.session_str())
        .await;
    if let Some(denied) = decision.denied {
        tracing::info!(
            kind = denied.kind.as_str(),
            window = denied.usage.window.as_str(),
            used = denied.usage.used,
            limit = denied.usage.limit,
            "Generation rejected by quota"
        );
        return Ok(quota_exceeded(&denied));
    }

    let job_id = state.jobs.create();
    request.job_id = job_id.clone();
    if let Some(session) = &identity.session {
        let uploads = &state.config.media.uploads_dir;
        state
            .lifecycle
            .track_inputs(session, request.inputs().filter(|p| p.starts_with(uploads)));
    }

    tracing::info!(
        job_id = %job_id,
        slides = request.slides.len(),
        avatars = request.avatars.len(),
        "Generation accepted"
    );

    let compositor = state.compositor.clone();
    let lifecycle = state.lifecycle.clone();
    let owner = identity.session.clone();
    state.jobs.spawn(job_id.clone(), move |progress| async move {
        let output = compositor.compose(&request, &progress).await?;
        let artifact = lifecycle.publish(output.path, owner.as_ref());
        Ok(JobResult {
            artifact_id: artifact.id,
            url: artifact.public_path,
            expires_at: artifact.expires_at_utc,
            duration_secs: output.duration_secs,
            slides: output.slides,
        })
    });

    Ok(Json(GenerateResponse { job_id }).into_response())
}

fn composition_request(state: &AppState, body: &GenerateRequest) -> AppResult<CompositionRequest> {
    let media = &state.config.media;

    if body.media.is_empty() {
        return Err(AppError::bad_request("at least one media file is required"));
    }
    let audio = body
        .audio
        .as_deref()
        .ok_or_else(|| AppError::bad_request("an audio track is required"))?;

    let slides = body
        .media
        .iter()
        .map(|reference| resolve_upload(&media.uploads_dir, reference))
        .collect::<AppResult<Vec<_>>>()?;

    let avatars = body
        .avatars
        .iter()
        .map(|avatar| {
            Ok(AvatarPlacement {
                source: resolve_character(&media.avatars_dir, &avatar.character)?,
                character: avatar.character.clone(),
                slide_index: avatar.slide_index,
                x_percent: avatar.x,
                y_percent: avatar.y,
                scale: avatar.scale.unwrap_or(1.0),
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    let settings = &body.settings;
    Ok(CompositionRequest {
        // Replaced once the job is created
        job_id: JobId::from("pending"),
        slides,
        audio: resolve_upload(&media.uploads_dir, audio)?,
        duration: settings.duration,
        fps: settings.fps.unwrap_or(media.default_fps),
        canvas: CanvasSize::new(
            settings.width.unwrap_or(media.canvas_width),
            settings.height.unwrap_or(media.canvas_height),
        ),
        avatars,
    })
}

/// Map an upload reference to a path inside `uploads_dir`. Absolute paths and
/// parent-directory segments are refused.
fn resolve_upload(uploads_dir: &Path, reference: &str) -> AppResult<PathBuf> {
    let reference = reference.trim();
    let relative = Path::new(reference);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if reference.is_empty() || escapes {
        return Err(AppError::bad_request(format!("invalid media reference: {reference}")));
    }
    Ok(uploads_dir.join(relative))
}

fn resolve_character(avatars_dir: &Path, character: &str) -> AppResult<PathBuf> {
    let valid = !character.is_empty()
        && character
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(AppError::bad_request(format!("unknown character: {character}")));
    }
    Ok(avatars_dir.join(format!("{character}.webm")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_references_stay_inside_uploads() {
        let dir = Path::new("/data/uploads");
        assert_eq!(
            resolve_upload(dir, "abc/photo.jpg").unwrap(),
            PathBuf::from("/data/uploads/abc/photo.jpg")
        );
        assert!(resolve_upload(dir, "../secrets").is_err());
        assert!(resolve_upload(dir, "a/../../b").is_err());
        assert!(resolve_upload(dir, "/etc/passwd").is_err());
        assert!(resolve_upload(dir, "").is_err());
    }

    #[test]
    fn test_character_names() {
        let dir = Path::new("/data/avatars");
        assert_eq!(
            resolve_character(dir, "dancing-cat").unwrap(),
            PathBuf::from("/data/avatars/dancing-cat.webm")
        );
        assert!(resolve_character(dir, "../cat").is_err());
        assert!(resolve_character(dir, "").is_err());
    }
}
