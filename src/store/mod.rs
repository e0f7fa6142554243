//! Job record persistence.
//!
//! The record store is external and eventually consistent: a record created by
//! one actor may not be visible to this service for a short while. Writes that
//! race record creation go through [`RetryingStore`]; routine progress writes
//! go through the background queue in [`crate::stage::queue`] instead.

pub mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::models::JobUpdate;

pub use sqlite::{DbHandle, SqliteJobStore};

/// Minimal contract this core needs from the record store.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn update(&self, job_id: &str, update: &JobUpdate) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    async fn update(&self, job_id: &str, update: &JobUpdate) -> Result<(), StoreError> {
        (**self).update(job_id, update).await
    }
}

/// Fixed-count, fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Store wrapper that retries failed updates, assuming failures are caused by
/// the record not being visible yet.
///
/// Every failed attempt is followed by the fixed delay, so an update that
/// never succeeds returns its last error after `max_attempts × delay`.
pub struct RetryingStore {
    inner: Arc<dyn JobStore>,
    policy: RetryPolicy,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn JobStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

#[async_trait]
impl JobStore for RetryingStore {
    async fn update(&self, job_id: &str, update: &JobUpdate) -> Result<(), StoreError> {
        update_with_retry(self.inner.as_ref(), job_id, update, self.policy).await
    }
}

/// Run `store.update` under `policy`, returning the last error once attempts
/// are exhausted.
pub async fn update_with_retry(
    store: &dyn JobStore,
    job_id: &str,
    update: &JobUpdate,
    policy: RetryPolicy,
) -> Result<(), StoreError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match store.update(job_id, update).await {
            Ok(()) => {
                if attempt > 1 {
                    tracing::debug!(job_id, attempt, "store update succeeded after retry");
                }
                return Ok(());
            }
            Err(e) => {
                tracing::debug!(job_id, attempt, error = %e, "store update failed");
                tokio::time::sleep(policy.delay).await;
                if attempt >= attempts {
                    return Err(e);
                }
                attempt += 1;
            }
        }
    }
}
