//! Temporary video links
//!
//! Resolution goes through the artifact store so lapsed or orphaned links
//! answer 410/404; the file itself is streamed by `ServeFile`, which handles
//! `Range`, conditional requests and content type.

use axum::{
    body::Body,
    extract::{Path, Request, State},
    response::Response,
};
use reelforge_core::models::ArtifactId;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use super::{error::AppResult, AppState};

/// GET /artifact/{artifact_id}
pub async fn serve_artifact(
    State(state): State<AppState>,
    Path(artifact_id): Path<String>,
    request: Request,
) -> AppResult<Response> {
    let artifact = state
        .lifecycle
        .artifacts()
        .resolve(&ArtifactId::from(artifact_id))?;

    tracing::debug!(artifact_id = %artifact.id, "Serving artifact");

    let response = match ServeFile::new(&artifact.source_path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    Ok(response.map(Body::new))
}
