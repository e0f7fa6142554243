//! Control surface: the operations exposed to callers (HTTP, CLI).
//!
//! `Orchestrator` owns the one `JobRegistry` and the one `PreviewManager`
//! for the process and wires them to the runner and workspace preparer.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::AppforgeConfig;
use crate::errors::JobError;
use crate::preview::{PreviewManager, PreviewStatus};
use crate::registry::JobRegistry;
use crate::runner::{JobMode, JobOutcome, JobSpec, ProcessRunner};
use crate::store::JobStore;
use crate::workspace::{WorkspacePreparer, populate_from_template};

pub struct Orchestrator {
    config: AppforgeConfig,
    registry: JobRegistry,
    runner: ProcessRunner,
    preparer: WorkspacePreparer,
    preview: Arc<PreviewManager>,
}

impl Orchestrator {
    pub fn new(config: AppforgeConfig, store: Arc<dyn JobStore>) -> Self {
        let registry = JobRegistry::new();
        let preparer = WorkspacePreparer::new(config.workspace.clone());
        let runner = ProcessRunner::new(
            config.generator.clone(),
            config.store.clone(),
            store,
            registry.clone(),
            preparer.clone(),
        );
        let preview = Arc::new(PreviewManager::new(config.preview.clone(), preparer.clone()));
        Self {
            config,
            registry,
            runner,
            preparer,
            preview,
        }
    }

    pub fn config(&self) -> &AppforgeConfig {
        &self.config
    }

    /// Workspace directory for `job_id`; ids that are not a single plain
    /// path segment are rejected.
    pub fn workspace_for(&self, job_id: &str) -> Result<PathBuf, JobError> {
        self.config
            .workspace
            .workspace_for(job_id)
            .ok_or_else(|| JobError::InvalidJobId {
                job_id: job_id.to_string(),
            })
    }

    fn existing_workspace(&self, job_id: &str) -> Result<PathBuf, JobError> {
        let path = self.workspace_for(job_id)?;
        if path.is_dir() {
            Ok(path)
        } else {
            Err(JobError::WorkspaceMissing {
                job_id: job_id.to_string(),
                path,
            })
        }
    }

    /// Create the job's workspace and start generating into it.
    ///
    /// The record for `job_id` must already exist (or be about to become
    /// visible) in the store. Returns once the job task is spawned.
    pub fn start_generation(
        &self,
        job_id: &str,
        prompt: &str,
        business_context: Option<String>,
    ) -> Result<JoinHandle<JobOutcome>, JobError> {
        let workspace = self.workspace_for(job_id)?;
        let setup_err = |source| JobError::WorkspaceSetup {
            path: workspace.clone(),
            source,
        };
        std::fs::create_dir_all(&workspace).map_err(setup_err)?;

        if let Some(template) = &self.config.workspace.template_dir {
            let copied = populate_from_template(template, &workspace).map_err(setup_err)?;
            tracing::info!(job_id, copied, template = %template.display(), "seeded workspace from template");
        }

        let install = self.preparer.start_speculative_install(&workspace);
        let spec = JobSpec {
            job_id: job_id.to_string(),
            workspace,
            prompt: prompt.to_string(),
            business_context,
            mode: JobMode::Generate,
            install,
        };
        tracing::info!(job_id, "generation accepted");
        let runner = self.runner.clone();
        Ok(tokio::spawn(async move { runner.run(spec).await }))
    }

    /// Continue generation in an existing job's workspace, recording progress
    /// under `iteration_id`.
    pub fn start_iteration(
        &self,
        job_id: &str,
        iteration_id: &str,
        prompt: &str,
    ) -> Result<JoinHandle<JobOutcome>, JobError> {
        let workspace = self.existing_workspace(job_id)?;
        let spec = JobSpec {
            job_id: iteration_id.to_string(),
            workspace,
            prompt: prompt.to_string(),
            business_context: None,
            mode: JobMode::Iterate,
            install: None,
        };
        tracing::info!(job_id, iteration_id, "iteration accepted");
        let runner = self.runner.clone();
        Ok(tokio::spawn(async move { runner.run(spec).await }))
    }

    /// Accept a preview request; the dev server starts in the background.
    pub fn start_preview(&self, job_id: &str) -> Result<PreviewStatus, JobError> {
        let workspace = self.existing_workspace(job_id)?;
        Ok(self.preview.start_in_background(job_id, workspace))
    }

    pub fn preview_status(&self, job_id: &str) -> Option<PreviewStatus> {
        self.preview.status(job_id)
    }

    pub async fn stop_preview(&self, job_id: &str) -> bool {
        self.preview.stop(job_id).await
    }

    pub fn active_jobs(&self) -> usize {
        self.registry.active()
    }

    /// Stop the preview, if any. Running generation jobs are left alone.
    pub async fn shutdown(&self) {
        self.preview.shutdown().await;
    }
}
