//! Job registry - tracks in-flight jobs and their cancelled flag

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Returned by a checkpoint that observed a cancelled job
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job {job_id} cancelled by user before {stage}")]
pub struct Cancelled {
    pub job_id: String,
    pub stage: String,
}

/// Returned by [`JobRegistry::start`] when the id belongs to a running job
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job {0} is already running")]
pub struct DuplicateJob(pub String);

/// Process-wide table of job id -> active flag.
///
/// Constructed once at startup and shared as `Arc<JobRegistry>`. Every
/// operation is a single short critical section; no backend call ever runs
/// while the lock is held.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, bool>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, bool>> {
        // Map updates are single inserts/removes, so a poisoned map is still consistent
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `job_id` as active. Re-registering resets it to active.
    pub fn register(&self, job_id: &str) {
        self.lock().insert(job_id.to_string(), true);
        debug!("Registered job {}", job_id);
    }

    /// Marks a registered job cancelled. Returns false if the id is unknown.
    pub fn cancel(&self, job_id: &str) -> bool {
        let cancelled = match self.lock().get_mut(job_id) {
            Some(active) => {
                *active = false;
                true
            }
            None => false,
        };
        if cancelled {
            info!("🛑 Cancellation requested for job {}", job_id);
        } else {
            debug!("Cancel ignored, job {} is not registered", job_id);
        }
        cancelled
    }

    /// True only for a registered job that has been cancelled. Unknown or
    /// removed ids report false.
    pub fn is_cancelled(&self, job_id: &str) -> bool {
        matches!(self.lock().get(job_id), Some(false))
    }

    /// Discards the entry; no-op if absent.
    pub fn remove(&self, job_id: &str) {
        if self.lock().remove(job_id).is_some() {
            debug!("Removed job {}", job_id);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Registers `job_id` and returns a guard that removes it when dropped,
    /// so every exit path (success, error, cancellation) cleans up.
    ///
    /// Fails if `job_id` is already registered; two runs sharing an id would
    /// share one cancel flag and the first guard to drop would unregister both.
    pub fn start(self: &Arc<Self>, job_id: impl Into<String>) -> Result<JobGuard, DuplicateJob> {
        let job_id = job_id.into();
        {
            let mut jobs = self.lock();
            if jobs.contains_key(&job_id) {
                return Err(DuplicateJob(job_id));
            }
            jobs.insert(job_id.clone(), true);
        }
        debug!("Started job {}", job_id);
        Ok(JobGuard {
            registry: Arc::clone(self),
            job_id,
        })
    }

    /// Cancels `job_id`, polling every `poll` until the job has been
    /// registered. Lets a cancel issued before the job starts still land.
    pub async fn cancel_when_registered(&self, job_id: &str, poll: Duration) {
        let mut ticker = tokio::time::interval(poll);
        loop {
            ticker.tick().await;
            if self.cancel(job_id) {
                return;
            }
        }
    }
}

/// Scoped registration of one job
#[derive(Debug)]
pub struct JobGuard {
    registry: Arc<JobRegistry>,
    job_id: String,
}

impl JobGuard {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.registry.is_cancelled(&self.job_id)
    }

    /// Fails with [`Cancelled`] if the job was cancelled; `stage` names the
    /// step that is about to start (or just finished).
    pub fn checkpoint(&self, stage: &str) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            info!("Job {} cancelled at checkpoint '{}'", self.job_id, stage);
            return Err(Cancelled {
                job_id: self.job_id.clone(),
                stage: stage.to_string(),
            });
        }
        Ok(())
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.job_id);
    }
}
