use axum::{
    extract::{Path, State},
    Json,
};
use reelforge_core::models::{GenerationJob, JobId, JobResult, JobStatus};
use serde::Serialize;

use super::{
    error::{AppError, AppResult},
    AppState,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub job_id: JobId,
    pub progress: u8,
    pub status: JobStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<GenerationJob> for ProgressResponse {
    fn from(job: GenerationJob) -> Self {
        Self {
            job_id: job.id,
            progress: job.progress,
            status: job.status,
            message: job.message,
            result: job.result,
            error: job.error,
        }
    }
}

/// GET /progress/{job_id}
pub async fn get_progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<ProgressResponse>> {
    state
        .jobs
        .get(&JobId::from(job_id))
        .map(|job| Json(job.into()))
        .ok_or_else(|| AppError::not_found("Job not found"))
}
