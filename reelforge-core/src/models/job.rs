use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::id::{ArtifactId, JobId};

/// Lifecycle of a generation job.
///
/// `Initializing -> Processing -> {Completed | Error}`; the last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Initializing,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

/// Descriptor of a successfully composed video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub artifact_id: ArtifactId,
    /// Public path of the temporary artifact link
    pub url: String,
    pub expires_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub slides: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    pub id: JobId,
    pub status: JobStatus,
    /// Percent complete, 0..=100
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl GenerationJob {
    #[must_use]
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            status: JobStatus::Initializing,
            progress: 0,
            message: "Queued".to_string(),
            result: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move a queued job to `processing`. No effect once the job has started.
    pub fn start(&mut self) {
        if self.status == JobStatus::Initializing {
            self.status = JobStatus::Processing;
            self.message = "Starting".to_string();
        }
    }

    /// Apply a progress update. Percent never decreases and stays below 100
    /// until the job completes; updates after a terminal state are ignored.
    pub fn apply_progress(&mut self, update: &ProgressUpdate) {
        if self.status.is_terminal() {
            return;
        }
        self.status = JobStatus::Processing;
        self.progress = self.progress.max(update.percent.min(99));
        self.message.clone_from(&update.message);
    }

    /// Returns false if the job had already reached a terminal state.
    pub fn complete(&mut self, result: JobResult) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.message = "Video ready".to_string();
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
        true
    }

    /// Returns false if the job had already reached a terminal state.
    pub fn fail(&mut self, error: String) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Error;
        self.message = "Generation failed".to_string();
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub message: String,
}

/// Sending half of a job's progress channel.
///
/// Reports are fire-and-forget: if the tracker has gone away the update is dropped.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ProgressReporter {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn report(&self, percent: u8, message: impl Into<String>) {
        let _ = self.tx.send(ProgressUpdate {
            percent,
            message: message.into(),
        });
    }

    /// A reporter whose updates go nowhere.
    #[must_use]
    pub fn noop() -> Self {
        Self::channel().0
    }
}
