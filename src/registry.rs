//! Count of in-flight generation and iteration jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared, cheaply cloneable counter of active jobs.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    active: Arc<AtomicUsize>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a job as active. The count drops again when the returned guard is
    /// dropped, whichever path the job ends on.
    pub fn begin(&self, job_id: &str) -> ActiveJob {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(job_id, active = now, "job started");
        ActiveJob {
            active: Arc::clone(&self.active),
            job_id: job_id.to_string(),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Guard held for the lifetime of one job.
#[derive(Debug)]
pub struct ActiveJob {
    active: Arc<AtomicUsize>,
    job_id: String,
}

impl ActiveJob {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        let now = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::debug!(job_id = %self.job_id, active = now, "job finished");
    }
}
