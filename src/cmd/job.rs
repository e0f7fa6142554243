//! Foreground job commands (`appforge generate` and `appforge iterate`).

use std::sync::Arc;

use anyhow::{Context, Result};

use appforge::config::AppforgeConfig;
use appforge::runner::JobOutcome;
use appforge::service::Orchestrator;
use appforge::store::SqliteJobStore;

fn open_store(config: &AppforgeConfig) -> Result<SqliteJobStore> {
    SqliteJobStore::new(&config.server.db_path).with_context(|| {
        format!(
            "Failed to open job database {}",
            config.server.db_path.display()
        )
    })
}

fn report(job_id: &str, outcome: JobOutcome) -> Result<()> {
    match outcome {
        JobOutcome::Completed { metadata, report } => {
            println!("Job {} complete", job_id);
            if let Some(title) = metadata.title {
                println!("  title:       {}", title);
            }
            if let Some(description) = metadata.description {
                println!("  description: {}", description);
            }
            println!("  install:     {:?}", report.install);
            println!("  schema:      {:?}", report.schema);
            println!("  seed:        {:?}", report.seed);
            Ok(())
        }
        JobOutcome::Failed { error } => {
            anyhow::bail!("Job {} failed: {}", job_id, error)
        }
    }
}

pub async fn cmd_generate(
    config: AppforgeConfig,
    prompt: &str,
    business_context: Option<String>,
    job_id: Option<String>,
) -> Result<()> {
    let store = open_store(&config)?;
    let job_id = job_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let orchestrator = Orchestrator::new(config, Arc::new(store.clone()));
    let workspace = orchestrator.workspace_for(&job_id)?;
    store.create_job(&job_id, prompt).await?;

    println!("Generating job {} in {}", job_id, workspace.display());
    let outcome = orchestrator
        .start_generation(&job_id, prompt, business_context)?
        .await
        .context("Job task panicked")?;
    report(&job_id, outcome)
}

pub async fn cmd_iterate(config: AppforgeConfig, job_id: &str, prompt: &str) -> Result<()> {
    let store = open_store(&config)?;
    let iteration_id = uuid::Uuid::new_v4().to_string();
    let orchestrator = Orchestrator::new(config, Arc::new(store.clone()));

    // Check the workspace before creating a record that could never run.
    let workspace = orchestrator.workspace_for(job_id)?;
    if !workspace.is_dir() {
        anyhow::bail!(
            "Workspace for job {} does not exist at {}",
            job_id,
            workspace.display()
        );
    }
    store.create_job(&iteration_id, prompt).await?;

    println!("Iterating on job {} as {}", job_id, iteration_id);
    let outcome = orchestrator
        .start_iteration(job_id, &iteration_id, prompt)?
        .await
        .context("Job task panicked")?;
    report(&iteration_id, outcome)
}
