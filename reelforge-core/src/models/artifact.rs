use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::time::Instant;

use super::id::ArtifactId;

/// A short-lived public link to a finished video.
#[derive(Debug, Clone)]
pub struct TemporaryArtifact {
    pub id: ArtifactId,
    pub source_path: PathBuf,
    pub public_path: String,
    pub expires_at: Instant,
    /// Wall-clock mirror of `expires_at` for clients.
    pub expires_at_utc: DateTime<Utc>,
    pub accessed: bool,
}

impl TemporaryArtifact {
    /// Expired at or after `expires_at`, whether or not the file still exists.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}
