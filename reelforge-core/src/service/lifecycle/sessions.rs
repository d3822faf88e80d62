use dashmap::DashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::models::{ClientSession, SessionId};

/// Heartbeat-tracked client sessions and the files they own
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<SessionId, ClientSession>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert liveness. `leaving` marks the session for the next sweep.
    pub fn heartbeat(&self, id: &SessionId, leaving: bool) {
        let mut session = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| ClientSession::new(id.clone()));
        session.last_heartbeat = Instant::now();
        session.leaving = leaving;
    }

    /// Attribute `path` to the session, creating the session if needed.
    pub fn track_file(&self, id: &SessionId, path: &Path) {
        self.sessions
            .entry(id.clone())
            .or_insert_with(|| ClientSession::new(id.clone()))
            .own(path);
    }

    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<ClientSession> {
        self.sessions.get(id).map(|s| s.clone())
    }

    /// Remove and return every session idle past `threshold`. Each removed
    /// session is returned exactly once.
    pub fn drain_idle(&self, now: Instant, threshold: Duration) -> Vec<ClientSession> {
        let idle: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|s| s.is_idle(now, threshold))
            .map(|s| s.id.clone())
            .collect();

        // A heartbeat may land between the scan and the removal.
        idle.into_iter()
            .filter_map(|id| {
                self.sessions
                    .remove_if(&id, |_, s| s.is_idle(now, threshold))
                    .map(|(_, s)| s)
            })
            .collect()
    }

    /// Files owned by sessions still alive
    #[must_use]
    pub fn live_paths(&self) -> HashSet<PathBuf> {
        self.sessions
            .iter()
            .flat_map(|s| s.files.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_keeps_session_alive() {
        let store = SessionStore::new();
        let id = SessionId::from("s1");
        store.heartbeat(&id, false);

        tokio::time::advance(Duration::from_secs(200)).await;
        store.heartbeat(&id, false);
        tokio::time::advance(Duration::from_secs(200)).await;

        assert!(store.drain_idle(Instant::now(), Duration::from_secs(300)).is_empty());
        tokio::time::advance(Duration::from_secs(101)).await;
        assert_eq!(store.drain_idle(Instant::now(), Duration::from_secs(300)).len(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_leaving_is_reclaimed_immediately() {
        let store = SessionStore::new();
        let id = SessionId::from("s1");
        store.heartbeat(&id, true);

        let drained = store.drain_idle(Instant::now(), Duration::from_secs(300));
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].id, id);
    }

    #[tokio::test]
    async fn test_heartbeat_is_idempotent() {
        let store = SessionStore::new();
        let id = SessionId::from("s1");
        store.heartbeat(&id, false);
        store.heartbeat(&id, false);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_files_follow_session() {
        let store = SessionStore::new();
        let id = SessionId::from("s1");
        store.track_file(&id, Path::new("/up/a.jpg"));
        store.track_file(&id, Path::new("/up/a.jpg"));
        store.track_file(&id, Path::new("/out/v.mp4"));

        assert_eq!(store.live_paths().len(), 2);

        tokio::time::advance(Duration::from_secs(301)).await;
        let drained = store.drain_idle(Instant::now(), Duration::from_secs(300));
        assert_eq!(drained[0].files.len(), 2);
        assert!(store.drain_idle(Instant::now(), Duration::from_secs(300)).is_empty());
    }
}
