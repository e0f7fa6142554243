//! Stage tracking from generator output.
//!
//! The generator embeds markers of the form `[TAG:STAGE:<name>]` anywhere in
//! its text output. Each recognized `<name>` becomes a `current_stage` write,
//! and `complete`/`failed` markers set the status as well; unknown names are
//! ignored. No ordering is enforced: the last recognized marker wins.
//!
//! Marker writes are queued. The queue is drained before the terminal write,
//! so the runner's post-exit outcome always lands last.

pub mod queue;

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::config::StoreConfig;
use crate::errors::StoreError;
use crate::models::{AppMetadata, JobUpdate, Stage};
use crate::store::{JobStore, RetryPolicy, update_with_retry};
use crate::stream::{DecodedEvent, describe_tool_use};

pub use queue::{UpdateQueue, WriterStats};

static MARKER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([A-Za-z0-9_\-]+):STAGE:([A-Za-z_]+)\]").unwrap());

/// Extract recognized stages from `text`, in order of appearance.
pub fn scan_markers(text: &str, tag: &str) -> Vec<Stage> {
    MARKER_REGEX
        .captures_iter(text)
        .filter(|cap| &cap[1] == tag)
        .filter_map(|cap| cap[2].parse::<Stage>().ok())
        .collect()
}

/// Maps decoded generator events to job record writes.
pub struct StageTracker {
    job_id: String,
    marker_tag: String,
    store: Arc<dyn JobStore>,
    queue: UpdateQueue,
    terminal_policy: RetryPolicy,
    last_stage: Option<Stage>,
}

impl StageTracker {
    /// Must be called within a tokio runtime (spawns the update writer).
    pub fn new(
        job_id: &str,
        marker_tag: &str,
        store: Arc<dyn JobStore>,
        config: &StoreConfig,
    ) -> Self {
        let queue = UpdateQueue::spawn(
            job_id,
            Arc::clone(&store),
            RetryPolicy::new(config.update_attempts, config.update_retry_delay()),
            config.queue_capacity,
        );
        Self {
            job_id: job_id.to_string(),
            marker_tag: marker_tag.to_string(),
            store,
            queue,
            terminal_policy: RetryPolicy::new(config.max_attempts, config.retry_delay()),
            last_stage: None,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Last recognized stage queued for persistence.
    pub fn last_stage(&self) -> Option<Stage> {
        self.last_stage
    }

    /// Route one decoded event. Returns the stages it carried.
    pub fn observe(&mut self, event: &DecodedEvent) -> Vec<Stage> {
        let mut seen = Vec::new();
        for text in event.text_payloads() {
            for stage in scan_markers(text, &self.marker_tag) {
                tracing::info!(job_id = %self.job_id, stage = %stage, "stage marker");
                self.queue.enqueue(JobUpdate::marker(stage));
                self.last_stage = Some(stage);
                seen.push(stage);
            }
        }
        for tool in event.tool_uses() {
            let detail = describe_tool_use(&tool.name, &tool.input);
            tracing::debug!(job_id = %self.job_id, detail = %detail, "tool use");
            self.queue.enqueue(JobUpdate::detail(detail));
        }
        seen
    }

    /// Persist the `complete` terminal state after all queued updates.
    pub async fn finish_complete(self, metadata: &AppMetadata) -> Result<(), StoreError> {
        self.finish(JobUpdate::complete(metadata)).await
    }

    /// Persist the `failed` terminal state after all queued updates.
    pub async fn finish_failed(self, error: &str) -> Result<(), StoreError> {
        self.finish(JobUpdate::failed(error)).await
    }

    async fn finish(self, update: JobUpdate) -> Result<(), StoreError> {
        let stats = self.queue.drain().await;
        if stats.failed > 0 {
            tracing::warn!(
                job_id = %self.job_id,
                failed = stats.failed,
                "some progress updates were not persisted"
            );
        }
        update_with_retry(self.store.as_ref(), &self.job_id, &update, self.terminal_policy).await
    }
}
