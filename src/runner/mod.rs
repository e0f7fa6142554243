//! Generator subprocess supervision.
//!
//! One [`ProcessRunner::run`] call drives a job from the initial
//! "generating" write to its terminal record:
//!
//! 1. Mark the record `generating` with its workspace path (retried, since the
//!    record may not be visible yet).
//! 2. Spawn the generator, stream stdout through the decoder into the
//!    [`StageTracker`], and keep bounded stdout/stderr tails for diagnostics.
//! 3. On exit 0, extract metadata and prepare the workspace, then persist
//!    `complete`. Otherwise persist `failed` with the captured diagnostics.
//!
//! The active-job counter is held by an [`crate::registry::ActiveJob`] guard
//! for the whole call.

pub mod tail;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;

use crate::config::{GeneratorConfig, StoreConfig};
use crate::errors::RunnerError;
use crate::models::{AppMetadata, JobUpdate};
use crate::registry::JobRegistry;
use crate::stage::StageTracker;
use crate::store::{JobStore, RetryPolicy, RetryingStore};
use crate::stream::decode_line;
use crate::workspace::{InstallTask, PreparationReport, WorkspacePreparer, extract_metadata};

pub use tail::{MAX_ERROR_CHARS, TailBuffer, collect_tail, read_lines};

/// Whether a job starts fresh or continues the previous generator context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMode {
    Generate,
    Iterate,
}

/// Everything needed to run one generation or iteration job.
pub struct JobSpec {
    /// Record id updated by this run.
    pub job_id: String,
    pub workspace: PathBuf,
    pub prompt: String,
    pub business_context: Option<String>,
    pub mode: JobMode,
    /// Install started when the workspace was created, if any.
    pub install: Option<InstallTask>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        metadata: AppMetadata,
        report: PreparationReport,
    },
    Failed {
        error: String,
    },
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }
}

#[derive(Clone)]
pub struct ProcessRunner {
    generator: GeneratorConfig,
    store_config: StoreConfig,
    store: Arc<dyn JobStore>,
    registry: JobRegistry,
    preparer: WorkspacePreparer,
}

impl ProcessRunner {
    pub fn new(
        generator: GeneratorConfig,
        store_config: StoreConfig,
        store: Arc<dyn JobStore>,
        registry: JobRegistry,
        preparer: WorkspacePreparer,
    ) -> Self {
        Self {
            generator,
            store_config,
            store,
            registry,
            preparer,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Prompt with the business-context block prepended when present.
    pub fn build_prompt(prompt: &str, business_context: Option<&str>) -> String {
        match business_context.map(str::trim).filter(|ctx| !ctx.is_empty()) {
            Some(ctx) => format!("## Business Context\n{}\n\n## Request\n{}", ctx, prompt),
            None => prompt.to_string(),
        }
    }

    /// Full generator argument list for a job.
    pub fn build_args(&self, spec: &JobSpec) -> Vec<String> {
        let mut args = self.generator.base_args.clone();
        if spec.mode == JobMode::Iterate {
            args.push(self.generator.continue_flag.clone());
        }
        if !self.generator.prompt_flag.is_empty() {
            args.push(self.generator.prompt_flag.clone());
        }
        args.push(Self::build_prompt(
            &spec.prompt,
            spec.business_context.as_deref(),
        ));
        args
    }

    /// Run a job to its terminal state. Never panics on generator failure;
    /// the outcome carries the error instead.
    pub async fn run(&self, mut spec: JobSpec) -> JobOutcome {
        let _active = self.registry.begin(&spec.job_id);
        let job_id = spec.job_id.clone();
        let install = spec.install.take();

        let initial = RetryingStore::new(
            Arc::clone(&self.store),
            RetryPolicy::new(self.store_config.max_attempts, self.store_config.retry_delay()),
        );
        let workspace_path = spec.workspace.to_string_lossy().to_string();
        if let Err(e) = initial
            .update(&job_id, &JobUpdate::generating(workspace_path))
            .await
        {
            tracing::error!(job_id = %job_id, error = %e, "could not mark job as generating, not starting generator");
            if let Some(task) = install {
                task.abort();
            }
            return JobOutcome::Failed {
                error: format!("Failed to mark job as generating: {}", e),
            };
        }

        let mut tracker = StageTracker::new(
            &job_id,
            &self.generator.marker_tag,
            Arc::clone(&self.store),
            &self.store_config,
        );

        let exit = match self.stream_generator(&spec, &mut tracker).await {
            Ok(exit) => exit,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "generator did not run");
                if let Some(task) = install {
                    task.abort();
                }
                let error = tail::truncate_error(&e.to_string());
                self.persist_failed(tracker, &error).await;
                return JobOutcome::Failed { error };
            }
        };

        if exit.success {
            tracing::info!(job_id = %job_id, "generator finished, preparing workspace");
            let metadata = extract_metadata(&spec.workspace).await;
            let report = self.preparer.prepare(&spec.workspace, install).await;
            if let Err(e) = tracker.finish_complete(&metadata).await {
                tracing::error!(job_id = %job_id, error = %e, "failed to persist completed state");
            }
            tracing::info!(job_id = %job_id, title = ?metadata.title, "job complete");
            JobOutcome::Completed { metadata, report }
        } else {
            if let Some(task) = install {
                task.abort();
            }
            let error = exit.failure_message();
            tracing::warn!(job_id = %job_id, exit_code = ?exit.code, error = %error, "generator failed");
            self.persist_failed(tracker, &error).await;
            JobOutcome::Failed { error }
        }
    }

    async fn persist_failed(&self, tracker: StageTracker, error: &str) {
        let job_id = tracker.job_id().to_string();
        if let Err(e) = tracker.finish_failed(error).await {
            tracing::error!(job_id = %job_id, error = %e, "failed to persist failed state");
        }
    }

    async fn stream_generator(
        &self,
        spec: &JobSpec,
        tracker: &mut StageTracker,
    ) -> Result<GeneratorExit, RunnerError> {
        let args = self.build_args(spec);
        let mut child = Command::new(&self.generator.command)
            .args(&args)
            .envs(&self.generator.env)
            .env_remove("CLAUDECODE")
            .current_dir(&spec.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RunnerError::SpawnFailed {
                program: self.generator.command.clone(),
                source,
            })?;

        tracing::info!(
            job_id = %spec.job_id,
            pid = child.id().unwrap_or(0),
            mode = ?spec.mode,
            "generator spawned"
        );

        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_tail(stderr, MAX_ERROR_CHARS)));

        let mut stdout_tail = TailBuffer::default();
        if let Some(stdout) = child.stdout.take() {
            read_lines(stdout, |line| {
                if line.trim().is_empty() {
                    return;
                }
                stdout_tail.push_line(line);
                tracker.observe(&decode_line(line));
            })
            .await;
        }

        let status = child.wait().await.map_err(RunnerError::Wait)?;
        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => TailBuffer::default(),
        };

        Ok(GeneratorExit {
            success: status.success(),
            code: status.code(),
            stdout: stdout_tail,
            stderr: stderr_tail,
        })
    }
}

struct GeneratorExit {
    success: bool,
    code: Option<i32>,
    stdout: TailBuffer,
    stderr: TailBuffer,
}

impl GeneratorExit {
    /// stderr, then stdout, then the exit code.
    fn failure_message(&self) -> String {
        if !self.stderr.is_blank() {
            return tail::truncate_error(self.stderr.as_str().trim());
        }
        if !self.stdout.is_blank() {
            return tail::truncate_error(self.stdout.as_str().trim());
        }
        RunnerError::NonZeroExit {
            exit_code: self.code,
        }
        .to_string()
    }
}
