use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::models::{ArtifactId, TemporaryArtifact};
use crate::{Error, Result};

/// Public route prefix under which artifact links are served.
pub const ARTIFACT_ROUTE_PREFIX: &str = "/artifact/";

/// Time-limited links to finished videos
#[derive(Clone)]
pub struct ArtifactStore {
    links: Arc<DashMap<ArtifactId, TemporaryArtifact>>,
    /// Backing files of links evicted on access, deleted by the next sweep.
    evicted: Arc<Mutex<Vec<PathBuf>>>,
    ttl: Duration,
}

impl ArtifactStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            links: Arc::new(DashMap::new()),
            evicted: Arc::new(Mutex::new(Vec::new())),
            ttl,
        }
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a link to `source_path` valid for the store's TTL.
    pub fn mint(&self, source_path: PathBuf) -> TemporaryArtifact {
        let id = ArtifactId::new();
        let artifact = TemporaryArtifact {
            public_path: format!("{ARTIFACT_ROUTE_PREFIX}{id}"),
            id: id.clone(),
            source_path,
            expires_at: Instant::now() + self.ttl,
            expires_at_utc: Utc::now() + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero()),
            accessed: false,
        };
        debug!(artifact_id = %id, path = %artifact.source_path.display(), "Artifact link minted");
        self.links.insert(id, artifact.clone());
        artifact
    }

    /// Look up a link for serving.
    ///
    /// Lapsed links and links whose file disappeared are evicted on the spot.
    pub fn resolve(&self, id: &ArtifactId) -> Result<TemporaryArtifact> {
        let now = Instant::now();
        let mut entry = self
            .links
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("artifact {id}")))?;

        if entry.is_expired(now) {
            drop(entry);
            if let Some((_, artifact)) = self.links.remove(id) {
                self.evicted.lock().push(artifact.source_path);
            }
            return Err(Error::Expired(format!("artifact {id}")));
        }

        if !entry.source_path.is_file() {
            drop(entry);
            self.links.remove(id);
            return Err(Error::NotFound(format!("artifact {id}")));
        }

        entry.accessed = true;
        Ok(entry.clone())
    }

    /// Remove every lapsed link and return the files to delete, including
    /// those of links evicted on access since the last drain.
    pub fn drain_expired(&self, now: Instant) -> Vec<PathBuf> {
        let mut paths = std::mem::take(&mut *self.evicted.lock());
        self.links.retain(|_, artifact| {
            if artifact.is_expired(now) {
                paths.push(artifact.source_path.clone());
                false
            } else {
                true
            }
        });
        paths
    }

    /// Files backing links that are still valid
    #[must_use]
    pub fn live_paths(&self) -> HashSet<PathBuf> {
        self.links.iter().map(|a| a.source_path.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
