//! Configuration view and initialization commands (`appforge config`).

use anyhow::{Context, Result};

use appforge::config::AppforgeConfig;

use super::super::ConfigCommands;

pub fn cmd_config(
    project_dir: &std::path::Path,
    effective: &AppforgeConfig,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = AppforgeConfig::path_for(project_dir);

    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No config file at {}; using defaults", config_path.display());
            }
            println!("# Effective values (with env/CLI overrides):");
            println!();
            print!("{}", effective.to_toml()?);
        }
        Some(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let content = AppforgeConfig::default().to_toml()?;
            std::fs::write(&config_path, content)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;
            println!("Created {}", config_path.display());
        }
    }

    Ok(())
}
