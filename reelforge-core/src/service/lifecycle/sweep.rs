//! Periodic reclamation of ephemeral files
//!
//! Each pass gathers candidates from three sources (idle sessions, lapsed
//! artifact links, and files older than their directory's age limit), merges
//! them into one set, and deletes each path once. Individual deletion
//! failures are logged and counted; they never stop the pass.

use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{ArtifactStore, SessionStore};
use crate::service::jobs::JobStore;
use crate::service::rate_limit::RateLimiter;

/// Entries directly under `dir` older than `max_age` are reclaimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgeRule {
    pub dir: PathBuf,
    pub max_age: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub sessions_evicted: usize,
    pub artifacts_expired: usize,
    pub aged_out: usize,
    pub deleted: usize,
    /// Candidates that were already gone
    pub already_gone: usize,
    pub failed: usize,
    pub counters_purged: usize,
}

impl SweepReport {
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.sessions_evicted == 0
            && self.artifacts_expired == 0
            && self.aged_out == 0
            && self.counters_purged == 0
    }
}

#[derive(Clone)]
pub struct Sweeper {
    artifacts: ArtifactStore,
    sessions: SessionStore,
    session_idle: Duration,
    age_rules: Vec<AgeRule>,
    /// Parent of the per-job render directories
    render_root: PathBuf,
    jobs: Option<JobStore>,
    rate_limiter: Option<RateLimiter>,
}

impl Sweeper {
    #[must_use]
    pub fn new(
        artifacts: ArtifactStore,
        sessions: SessionStore,
        session_idle: Duration,
        age_rules: Vec<AgeRule>,
        render_root: PathBuf,
    ) -> Self {
        Self {
            artifacts,
            sessions,
            session_idle,
            age_rules,
            render_root,
            jobs: None,
            rate_limiter: None,
        }
    }

    /// Keep the render directories of unfinished jobs out of the age pass.
    #[must_use]
    pub fn with_jobs(mut self, jobs: JobStore) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Also purge lapsed in-process rate counters on every pass.
    #[must_use]
    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub async fn run_once(&self) -> SweepReport {
        let now = Instant::now();
        let mut report = SweepReport::default();
        let mut targets = BTreeSet::new();

        for session in self.sessions.drain_idle(now, self.session_idle) {
            debug!(
                session_id = %session.id,
                files = session.files.len(),
                leaving = session.leaving,
                "Session evicted"
            );
            report.sessions_evicted += 1;
            targets.extend(session.files);
        }

        let expired = self.artifacts.drain_expired(now);
        report.artifacts_expired = expired.len();
        targets.extend(expired);

        let mut protected = self.artifacts.live_paths();
        protected.extend(self.sessions.live_paths());
        if let Some(jobs) = &self.jobs {
            protected.extend(
                jobs.active_ids()
                    .into_iter()
                    .map(|id| self.render_root.join(id.as_str())),
            );
        }
        for rule in &self.age_rules {
            let aged = aged_entries(rule, &protected).await;
            report.aged_out += aged.len();
            targets.extend(aged);
        }

        for path in &targets {
            match remove_path(path).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => report.already_gone += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to delete file");
                    report.failed += 1;
                }
            }
        }

        if let Some(limiter) = &self.rate_limiter {
            report.counters_purged = limiter.purge_expired().await;
        }

        if report.is_idle() {
            debug!("Sweep found nothing to reclaim");
        } else {
            info!(
                sessions = report.sessions_evicted,
                artifacts = report.artifacts_expired,
                aged = report.aged_out,
                deleted = report.deleted,
                failed = report.failed,
                "Sweep completed"
            );
        }
        report
    }

    /// Sweep every `period` until `shutdown` flips to true.
    pub fn spawn(self, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup is not a sweep.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.run_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Sweeper stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

async fn aged_entries(rule: &AgeRule, protected: &HashSet<PathBuf>) -> Vec<PathBuf> {
    let mut entries = match tokio::fs::read_dir(&rule.dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(dir = %rule.dir.display(), error = %e, "Cannot scan directory for aged files");
            return Vec::new();
        }
    };

    let wall_now = SystemTime::now();
    let mut aged = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %rule.dir.display(), error = %e, "Directory scan interrupted");
                break;
            }
        };
        let path = entry.path();
        if protected.contains(&path) {
            continue;
        }
        let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) else {
            continue;
        };
        if wall_now.duration_since(modified).unwrap_or_default() > rule.max_age {
            aged.push(path);
        }
    }
    aged
}

/// Delete a file or directory tree. `Ok(false)` when it was already gone.
async fn remove_path(path: &Path) -> std::io::Result<bool> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let removed = if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match removed {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
