use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

use super::id::SessionId;

/// A browser session kept alive by heartbeats.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub id: SessionId,
    pub last_heartbeat: Instant,
    /// Set by an explicit "leaving" signal; the next sweep reclaims the session.
    pub leaving: bool,
    /// Files this session caused to exist. Only ever appended to.
    pub files: Vec<PathBuf>,
}

impl ClientSession {
    #[must_use]
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            last_heartbeat: Instant::now(),
            leaving: false,
            files: Vec::new(),
        }
    }

    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat)
    }

    #[must_use]
    pub fn is_idle(&self, now: Instant, threshold: Duration) -> bool {
        self.leaving || self.idle_for(now) > threshold
    }

    /// Record ownership of `path`; repeated paths are kept once.
    pub fn own(&mut self, path: &Path) {
        if !self.files.iter().any(|p| p == path) {
            self.files.push(path.to_path_buf());
        }
    }
}
