//! In-memory generation job tracking
//!
//! Jobs run detached from the request that created them. Callers get a job id
//! back immediately and poll [`JobTracker::get`]. Finished jobs stay visible
//! for a grace period and are then dropped.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::models::{GenerationJob, JobId, JobResult, ProgressReporter, ProgressUpdate};

/// Concurrent map of job records
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<DashMap<JobId, GenerationJob>>,
}

impl JobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: GenerationJob) {
        self.jobs.insert(job.id.clone(), job);
    }

    #[must_use]
    pub fn get(&self, id: &JobId) -> Option<GenerationJob> {
        self.jobs.get(id).map(|job| job.clone())
    }

    /// Mutate a record in place. Returns `None` if the job is gone.
    pub fn update<R>(&self, id: &JobId, f: impl FnOnce(&mut GenerationJob) -> R) -> Option<R> {
        self.jobs.get_mut(id).map(|mut job| f(&mut job))
    }

    pub fn remove(&self, id: &JobId) -> Option<GenerationJob> {
        self.jobs.remove(id).map(|(_, job)| job)
    }

    /// Ids of jobs that have not reached a terminal state.
    #[must_use]
    pub fn active_ids(&self) -> Vec<JobId> {
        self.jobs
            .iter()
            .filter(|job| !job.status.is_terminal())
            .map(|job| job.id.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[derive(Clone)]
pub struct JobTracker {
    store: JobStore,
    terminal_grace: Duration,
}

impl JobTracker {
    #[must_use]
    pub fn new(terminal_grace: Duration) -> Self {
        Self {
            store: JobStore::new(),
            terminal_grace,
        }
    }

    /// Insert a fresh record at 0%.
    #[must_use]
    pub fn create(&self) -> JobId {
        let job = GenerationJob::new(JobId::new());
        let id = job.id.clone();
        self.store.insert(job);
        id
    }

    #[must_use]
    pub fn get(&self, id: &JobId) -> Option<GenerationJob> {
        self.store.get(id)
    }

    #[must_use]
    pub const fn store(&self) -> &JobStore {
        &self.store
    }

    /// Run `work` in the background and drive the job to a terminal state.
    ///
    /// Progress reported through the handed-out [`ProgressReporter`] is applied
    /// to the record as it arrives. An error or a panic in `work` ends the job
    /// in `error`. The record is removed `terminal_grace` after it finishes.
    pub fn spawn<F, Fut>(&self, id: JobId, work: F) -> JoinHandle<()>
    where
        F: FnOnce(ProgressReporter) -> Fut,
        Fut: Future<Output = crate::Result<JobResult>> + Send + 'static,
    {
        let (reporter, mut updates) = ProgressReporter::channel();
        let mut task = tokio::spawn(work(reporter));
        let store = self.store.clone();
        let grace = self.terminal_grace;

        tokio::spawn(async move {
            // Terminal transitions happen below, so the job is always seen
            // in `processing` first.
            store.update(&id, GenerationJob::start);

            let apply = |update: &ProgressUpdate| {
                store.update(&id, |job| job.apply_progress(update));
            };

            let outcome = loop {
                tokio::select! {
                    Some(update) = updates.recv() => apply(&update),
                    result = &mut task => break result,
                }
            };
            while let Ok(update) = updates.try_recv() {
                apply(&update);
            }

            let finished = match outcome {
                Ok(Ok(result)) => {
                    info!(job_id = %id, artifact_id = %result.artifact_id, "Job completed");
                    store.update(&id, |job| job.complete(result))
                }
                Ok(Err(e)) => {
                    warn!(job_id = %id, error = %e, "Job failed");
                    store.update(&id, |job| job.fail(e.to_string()))
                }
                Err(join_error) => {
                    error!(job_id = %id, error = %join_error, "Job task aborted");
                    store.update(&id, |job| job.fail("Internal error during generation".to_string()))
                }
            };
            if finished.is_none() {
                warn!(job_id = %id, "Job record vanished before completion");
                return;
            }

            tokio::time::sleep(grace).await;
            store.remove(&id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArtifactId, JobStatus};
    use chrono::Utc;

    fn result() -> JobResult {
        JobResult {
            artifact_id: ArtifactId::from("a1"),
            url: "/artifact/a1".to_string(),
            expires_at: Utc::now(),
            duration_secs: 30.0,
            slides: 3,
        }
    }

    #[tokio::test]
    async fn test_create_starts_at_zero() {
        let tracker = JobTracker::new(Duration::from_secs(300));
        let id = tracker.create();

        let job = tracker.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Initializing);
        assert_eq!(job.progress, 0);
        assert!(tracker.get(&JobId::from("missing")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_job_lifecycle() {
        let tracker = JobTracker::new(Duration::from_secs(300));
        let id = tracker.create();

        let handle = tracker.spawn(id.clone(), |progress| async move {
            progress.report(40, "Encoding video");
            Ok(result())
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        let job = tracker.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.result.unwrap().slides, 3);

        tokio::time::sleep(Duration::from_secs(300)).await;
        handle.await.unwrap();
        assert!(tracker.get(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_keeps_error() {
        let tracker = JobTracker::new(Duration::from_secs(300));
        let id = tracker.create();

        tracker.spawn(id.clone(), |_| async move {
            Err(crate::Error::Internal("encoder exited with 1".to_string()))
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        let job = tracker.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error.unwrap().contains("encoder exited"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_processing_before_early_failure() {
        let tracker = JobTracker::new(Duration::from_secs(300));
        let id = tracker.create();
        let (release, released) = tokio::sync::oneshot::channel::<()>();

        // Fails before reporting any progress, like a swept source.
        tracker.spawn(id.clone(), |_| async move {
            let _ = released.await;
            Err(crate::Error::Internal("source not found".to_string()))
        });
        assert_eq!(tracker.get(&id).unwrap().status, JobStatus::Initializing);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let job = tracker.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 0);

        release.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(tracker.get(&id).unwrap().status, JobStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_job_ends_in_error() {
        let tracker = JobTracker::new(Duration::from_secs(300));
        let id = tracker.create();

        tracker.spawn(id.clone(), |_| async move {
            if std::hint::black_box(true) {
                panic!("boom");
            }
            Ok(result())
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(tracker.get(&id).unwrap().status, JobStatus::Error);
    }
}
