//! Background writer for fire-and-forget job updates.
//!
//! One queue per job. A single writer task drains updates in FIFO order, so
//! stage writes land in the order their markers were observed. Producers never
//! wait: when the queue is full the update is dropped and logged, which keeps a
//! slow store from backpressuring the generator's output stream.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::models::JobUpdate;
use crate::store::{JobStore, RetryPolicy, update_with_retry};

pub struct UpdateQueue {
    job_id: String,
    tx: mpsc::Sender<JobUpdate>,
    writer: JoinHandle<WriterStats>,
}

/// Counters reported by the writer task when the queue is drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub written: usize,
    pub failed: usize,
}

impl UpdateQueue {
    /// Spawn the writer task. Must be called within a tokio runtime.
    pub fn spawn(
        job_id: &str,
        store: Arc<dyn JobStore>,
        policy: RetryPolicy,
        capacity: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<JobUpdate>(capacity.max(1));
        let writer_job_id = job_id.to_string();
        let writer = tokio::spawn(async move {
            let mut stats = WriterStats::default();
            while let Some(update) = rx.recv().await {
                match update_with_retry(store.as_ref(), &writer_job_id, &update, policy).await {
                    Ok(()) => stats.written += 1,
                    Err(e) => {
                        stats.failed += 1;
                        tracing::warn!(
                            job_id = %writer_job_id,
                            error = %e,
                            update = ?update,
                            "dropping job update after retries"
                        );
                    }
                }
            }
            stats
        });
        Self {
            job_id: job_id.to_string(),
            tx,
            writer,
        }
    }

    /// Queue an update without waiting. Returns false if it was dropped.
    pub fn enqueue(&self, update: JobUpdate) -> bool {
        match self.tx.try_send(update) {
            Ok(()) => true,
            Err(TrySendError::Full(update)) => {
                tracing::warn!(job_id = %self.job_id, update = ?update, "update queue full, dropping update");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(job_id = %self.job_id, "update queue closed, dropping update");
                false
            }
        }
    }

    /// Close the queue and wait until every queued update has been attempted.
    pub async fn drain(self) -> WriterStats {
        drop(self.tx);
        match self.writer.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(job_id = %self.job_id, "update writer task panicked: {}", e);
                WriterStats::default()
            }
        }
    }
}
