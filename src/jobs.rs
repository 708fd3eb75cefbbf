//! Per-project job control: one running job per project, cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::EngineError;
use crate::progress::{ChunkProgress, ProgressObserver, ProgressTracker};

#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a running job carries down the call chain.
#[derive(Clone)]
pub struct JobContext {
    pub project_id: String,
    pub cancel: CancelToken,
    pub progress: ProgressTracker,
}

impl JobContext {
    /// A context that is not registered anywhere; used for one-off runs and tests.
    pub fn detached(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            cancel: CancelToken::new(),
            progress: ProgressTracker::new(None),
        }
    }
}

#[derive(Clone)]
struct JobEntry {
    cancel: CancelToken,
    progress: ProgressTracker,
}

/// Registry of running jobs keyed by project id.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<DashMap<String, JobEntry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job for `project_id`. Fails if one is already running.
    ///
    /// The returned guard removes the registration when dropped.
    pub fn start(
        &self,
        project_id: &str,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<JobGuard, EngineError> {
        let entry = JobEntry {
            cancel: CancelToken::new(),
            progress: ProgressTracker::new(observer),
        };
        match self.jobs.entry(project_id.to_string()) {
            Entry::Occupied(_) => Err(EngineError::JobAlreadyRunning(project_id.to_string())),
            Entry::Vacant(v) => {
                v.insert(entry.clone());
                tracing::debug!(project = project_id, "job registered");
                Ok(JobGuard {
                    registry: self.clone(),
                    ctx: JobContext {
                        project_id: project_id.to_string(),
                        cancel: entry.cancel,
                        progress: entry.progress,
                    },
                })
            }
        }
    }

    /// Signals the running job to stop at its next batch or chapter boundary.
    ///
    /// Returns false when no job is running for the project.
    pub fn request_stop(&self, project_id: &str) -> bool {
        match self.jobs.get(project_id) {
            Some(job) => {
                job.cancel.cancel();
                tracing::info!(project = project_id, "stop requested");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, project_id: &str) -> bool {
        self.jobs.contains_key(project_id)
    }

    pub fn chunk_progress(&self, project_id: &str) -> Option<ChunkProgress> {
        self.jobs.get(project_id).and_then(|j| j.progress.snapshot())
    }
}

pub struct JobGuard {
    registry: JobRegistry,
    ctx: JobContext,
}

impl JobGuard {
    pub fn context(&self) -> &JobContext {
        &self.ctx
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.registry.jobs.remove(&self.ctx.project_id);
        tracing::debug!(project = %self.ctx.project_id, "job released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_start_is_rejected_until_guard_drops() {
        let reg = JobRegistry::new();
        let guard = reg.start("p1", None).unwrap();
        let err = reg.start("p1", None).err().unwrap();
        assert!(matches!(err, EngineError::JobAlreadyRunning(ref id) if id == "p1"));
        assert!(reg.start("p2", None).is_ok());
        drop(guard);
        assert!(!reg.is_running("p1"));
        assert!(reg.start("p1", None).is_ok());
    }

    #[test]
    fn stop_reaches_the_running_context() {
        let reg = JobRegistry::new();
        let guard = reg.start("p", None).unwrap();
        assert!(!guard.context().cancel.is_cancelled());
        assert!(reg.request_stop("p"));
        assert!(guard.context().cancel.is_cancelled());
        assert!(!reg.request_stop("other"));
    }

    #[test]
    fn progress_is_visible_while_running_and_gone_after() {
        let reg = JobRegistry::new();
        let guard = reg.start("p", None).unwrap();
        guard.context().progress.set(2, "Three", 1, 4);
        let p = reg.chunk_progress("p").unwrap();
        assert_eq!((p.chapter_index, p.chunks_done, p.chunks_total), (2, 1, 4));
        drop(guard);
        assert!(reg.chunk_progress("p").is_none());
    }
}
