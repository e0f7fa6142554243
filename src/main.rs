use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use appforge::config::AppforgeConfig;
use appforge::logging::{LogFormat, init_logging};

mod cmd;

#[derive(Parser)]
#[command(name = "appforge")]
#[command(version, about = "App generation orchestrator with a single live preview")]
pub struct Cli {
    /// Project directory holding `.appforge/` (defaults to the current directory)
    #[arg(long, global = true, env = "APPFORGE_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    /// Emit JSON logs
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Write logs to daily-rolling files in this directory instead of stderr
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Generator executable (overrides config and APPFORGE_GENERATOR_CMD)
    #[arg(long, global = true)]
    pub generator: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP control surface
    Serve {
        /// Port to serve on (defaults to [server].port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind on all interfaces with permissive CORS
        #[arg(long)]
        dev: bool,
    },
    /// Run one generation job in the foreground and wait for it
    Generate {
        /// What to build
        prompt: String,

        /// Business context prepended to the prompt
        #[arg(long)]
        context: Option<String>,

        /// Record id to use (defaults to a new UUID)
        #[arg(long)]
        job_id: Option<String>,
    },
    /// Run a follow-up iteration in an existing job's workspace
    Iterate {
        /// Job whose workspace to continue in
        job_id: String,

        /// Requested change
        prompt: String,
    },
    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write a default appforge.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// File → environment → CLI layering.
fn load_config(cli: &Cli, project_dir: &std::path::Path) -> Result<AppforgeConfig> {
    let mut config = AppforgeConfig::load(project_dir)?;
    config.apply_env_overrides()?;
    if let Some(generator) = &cli.generator {
        config.generator.command = generator.clone();
    }
    config.resolve_paths(project_dir);
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let _log_guard = init_logging(LogFormat::detect(cli.log_json), cli.log_dir.as_deref());

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Serve { port, dev } => {
            let config = load_config(&cli, &project_dir)?;
            cmd::cmd_serve(config, *port, *dev).await?;
        }
        Commands::Generate {
            prompt,
            context,
            job_id,
        } => {
            let config = load_config(&cli, &project_dir)?;
            cmd::cmd_generate(config, prompt, context.clone(), job_id.clone()).await?;
        }
        Commands::Iterate { job_id, prompt } => {
            let config = load_config(&cli, &project_dir)?;
            cmd::cmd_iterate(config, job_id, prompt).await?;
        }
        Commands::Config { command } => {
            let config = load_config(&cli, &project_dir)?;
            cmd::cmd_config(&project_dir, &config, command.clone())?;
        }
    }

    Ok(())
}
