//! Typed error hierarchy for appforge.
//!
//! One enum per seam:
//! - `RunnerError`: generator subprocess failures (spawn, non-zero exit)
//! - `StoreError`: job record persistence failures
//! - `PrepareError`: best-effort workspace preparation steps
//! - `PreviewError`: preview dev-server lifecycle failures
//! - `JobError`: control-surface preconditions

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the generator subprocess.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to spawn generator process '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Generator exited with code {}",
        .exit_code.map_or_else(|| "unknown (killed by signal)".to_string(), |c| c.to_string())
    )]
    NonZeroExit { exit_code: Option<i32> },

    #[error("Failed to wait for generator process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Errors from the job record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record is not (yet) visible. Usually replication lag between the
    /// writer that created the record and this updater.
    #[error("Job {job_id} not found")]
    NotFound { job_id: String },

    #[error("Store backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Errors from a single workspace preparation step. Always contained.
#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with code {exit_code:?}: {output}")]
    Failed {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("'{command}' timed out after {secs}s")]
    TimedOut { command: String, secs: u64 },

    #[error("Speculative install task panicked: {0}")]
    InstallTaskPanicked(String),
}

/// Errors from the preview lifecycle.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("Workspace {0} does not exist")]
    WorkspaceMissing(PathBuf),

    #[error("Failed to patch workspace for preview: {0}")]
    PatchFailed(#[source] std::io::Error),

    #[error("Failed to spawn dev server '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dev server exited before becoming ready: {0}")]
    ExitedBeforeReady(String),

    #[error("Preview for job {0} was stopped or replaced before it launched")]
    Withdrawn(String),
}

/// Errors returned by control-surface operations.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid job id '{job_id}'")]
    InvalidJobId { job_id: String },

    #[error("Workspace for job {job_id} does not exist at {path}")]
    WorkspaceMissing { job_id: String, path: PathBuf },

    #[error("Failed to prepare workspace {path}: {source}")]
    WorkspaceSetup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
