//! Post-generation workspace preparation.
//!
//! Everything here is best-effort: failures are logged and reported in a
//! [`PreparationReport`] but never change a job's terminal status, which is
//! decided solely by the generator's exit code.
//!
//! ```text
//! job creation ──> start_speculative_install() ──> InstallTask (background)
//!                                                        │
//! generator exits 0 ──> prepare() ── await InstallTask ──┘
//!                          ├─ ok     → incremental sync (60s)
//!                          ├─ err    → full install (120s)
//!                          ├─ schema sync against the local dev database
//!                          └─ seed script, if present
//! ```

pub mod command;
pub mod files;

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::WorkspaceConfig;
use crate::errors::PrepareError;

pub use command::{StepReport, run_step};
pub use files::{extract_metadata, populate_from_template};

/// Handle to a dependency install started before the generator finished.
/// Consumed by [`WorkspacePreparer::prepare`]; never restarted.
pub struct InstallTask {
    workspace: PathBuf,
    handle: JoinHandle<Result<(), PrepareError>>,
}

impl InstallTask {
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Wait for the install to finish.
    pub async fn wait(self) -> Result<(), PrepareError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(PrepareError::InstallTaskPanicked(e.to_string())),
        }
    }

    /// Cancel the install. The install process is killed with the task.
    pub fn abort(self) {
        self.handle.abort();
    }
}

/// Results of each preparation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparationReport {
    pub install: StepReport,
    pub schema: StepReport,
    pub seed: StepReport,
}

#[derive(Debug, Clone)]
pub struct WorkspacePreparer {
    config: WorkspaceConfig,
}

impl WorkspacePreparer {
    pub fn new(config: WorkspaceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    /// Start a full install in the background, if the workspace has a
    /// `package.json` to install from. Must be called within a tokio runtime.
    pub fn start_speculative_install(&self, workspace: &Path) -> Option<InstallTask> {
        if !workspace.join("package.json").exists() {
            return None;
        }
        tracing::info!(workspace = %workspace.display(), "starting speculative dependency install");
        let spec = self.config.install.clone();
        let timeout = Duration::from_secs(self.config.install_timeout_secs);
        let dir = workspace.to_path_buf();
        let handle = tokio::spawn(async move { run_step(&spec, &[], &dir, &[], timeout).await });
        Some(InstallTask {
            workspace: workspace.to_path_buf(),
            handle,
        })
    }

    /// Run all preparation steps once. Never fails.
    pub async fn prepare(&self, workspace: &Path, install: Option<InstallTask>) -> PreparationReport {
        let install = self.reconcile_install(workspace, install).await;
        let schema = self.sync_schema(workspace).await;
        let seed = self.run_seed(workspace).await;
        PreparationReport {
            install,
            schema,
            seed,
        }
    }

    /// Full install with the long timeout.
    pub async fn install_dependencies(&self, workspace: &Path) -> StepReport {
        let result = run_step(
            &self.config.install,
            &[],
            workspace,
            &[],
            Duration::from_secs(self.config.install_timeout_secs),
        )
        .await;
        StepReport::from_result("install", workspace, result)
    }

    async fn reconcile_install(&self, workspace: &Path, install: Option<InstallTask>) -> StepReport {
        let speculative = match install {
            Some(task) => Some(task.wait().await),
            None => None,
        };

        match speculative {
            Some(Ok(())) => {
                let result = run_step(
                    &self.config.sync,
                    &[],
                    workspace,
                    &[],
                    Duration::from_secs(self.config.sync_timeout_secs),
                )
                .await;
                StepReport::from_result("dependency sync", workspace, result)
            }
            Some(Err(e)) => {
                tracing::warn!(
                    workspace = %workspace.display(),
                    error = %e,
                    "speculative install failed, running full install"
                );
                self.install_dependencies(workspace).await
            }
            None => self.install_dependencies(workspace).await,
        }
    }

    async fn sync_schema(&self, workspace: &Path) -> StepReport {
        let result = run_step(
            &self.config.schema_sync,
            &[],
            workspace,
            &[("DATABASE_URL", self.config.database_url.as_str())],
            Duration::from_secs(self.config.schema_timeout_secs),
        )
        .await;
        StepReport::from_result("schema sync", workspace, result)
    }

    /// First configured seed script present in the workspace.
    pub fn find_seed_script(&self, workspace: &Path) -> Option<PathBuf> {
        self.config
            .seed_scripts
            .iter()
            .find(|script| workspace.join(script).is_file())
            .cloned()
    }

    async fn run_seed(&self, workspace: &Path) -> StepReport {
        let Some(script) = self.find_seed_script(workspace) else {
            tracing::debug!(workspace = %workspace.display(), "no seed script, skipping");
            return StepReport::Skipped;
        };
        let result = run_step(
            &self.config.seed_runner,
            &[script.to_string_lossy().to_string()],
            workspace,
            &[("DATABASE_URL", self.config.database_url.as_str())],
            Duration::from_secs(self.config.seed_timeout_secs),
        )
        .await;
        StepReport::from_result("seed", workspace, result)
    }
}
