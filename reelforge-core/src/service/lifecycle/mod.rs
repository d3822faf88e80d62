//! Bounded lifetimes for artifact links, sessions, and working files

mod artifacts;
mod sessions;
mod sweep;

pub use artifacts::{ArtifactStore, ARTIFACT_ROUTE_PREFIX};
pub use sessions::SessionStore;
pub use sweep::{AgeRule, SweepReport, Sweeper};

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{LifecycleConfig, MediaConfig};
use crate::models::{SessionId, TemporaryArtifact};

/// Artifact and session stores plus the sweep policy over the media directories
#[derive(Clone)]
pub struct LifecycleManager {
    artifacts: ArtifactStore,
    sessions: SessionStore,
    session_idle: Duration,
    sweep_interval: Duration,
    age_rules: Vec<AgeRule>,
    render_root: PathBuf,
}

impl LifecycleManager {
    #[must_use]
    pub fn new(lifecycle: &LifecycleConfig, media: &MediaConfig) -> Self {
        let temp_age = Duration::from_secs(lifecycle.temp_max_age_secs);
        let file_age = Duration::from_secs(lifecycle.max_file_age_secs);
        Self {
            artifacts: ArtifactStore::new(Duration::from_secs(lifecycle.artifact_ttl_secs)),
            sessions: SessionStore::new(),
            session_idle: Duration::from_secs(lifecycle.session_idle_secs),
            sweep_interval: Duration::from_secs(lifecycle.sweep_interval_secs),
            age_rules: vec![
                AgeRule {
                    dir: media.temp_dir(),
                    max_age: temp_age,
                },
                AgeRule {
                    dir: media.output_dir(),
                    max_age: file_age,
                },
                AgeRule {
                    dir: media.uploads_dir.clone(),
                    max_age: file_age,
                },
            ],
            render_root: media.temp_dir(),
        }
    }

    #[must_use]
    pub const fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Publish a finished video. When a session is given, the file is also
    /// reclaimed with that session.
    pub fn publish(&self, path: PathBuf, owner: Option<&SessionId>) -> TemporaryArtifact {
        if let Some(session) = owner {
            self.sessions.track_file(session, &path);
        }
        self.artifacts.mint(path)
    }

    pub fn track_inputs<'a>(&self, session: &SessionId, paths: impl IntoIterator<Item = &'a Path>) {
        for path in paths {
            self.sessions.track_file(session, path);
        }
    }

    #[must_use]
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.artifacts.clone(),
            self.sessions.clone(),
            self.session_idle,
            self.age_rules.clone(),
            self.render_root.clone(),
        )
    }
}
