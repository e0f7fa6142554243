//! Configuration for appforge.
//!
//! Reads `.appforge/appforge.toml` from the project directory, falling back to
//! defaults for every missing field. Layering is file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [generator]
//! command = "claude"
//! marker_tag = "APPFORGE"
//!
//! [generator.env]
//! ANTHROPIC_API_KEY = "sk-..."
//!
//! [store]
//! max_attempts = 5
//! retry_delay_ms = 1000
//!
//! [workspace]
//! root = "workspaces"
//! template_dir = "templates/next-app"
//! install_timeout_secs = 120
//!
//! [workspace.install]
//! program = "npm"
//! args = ["install", "--no-audit", "--no-fund"]
//!
//! [preview]
//! port = 3100
//! public_url = "http://localhost:{port}"
//! ready_timeout_secs = 30
//!
//! [server]
//! port = 3140
//! db_path = ".appforge/jobs.db"
//! ```

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Name of the config directory inside a project.
pub const CONFIG_DIR: &str = ".appforge";
/// Name of the config file inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "appforge.toml";

/// A program plus its argument list. `{port}` in any argument is substituted
/// where the caller supplies a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Arguments with `{port}` replaced.
    pub fn args_with_port(&self, port: u16) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace("{port}", &port.to_string()))
            .collect()
    }

    /// Human-readable rendering for logs and error messages.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Generator subprocess settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Generator executable (default: "claude")
    pub command: String,
    /// Arguments placed before the prompt.
    pub base_args: Vec<String>,
    /// Flag passed for iteration jobs to continue the previous context.
    pub continue_flag: String,
    /// Flag placed before the prompt. Empty passes the prompt as the final
    /// positional argument.
    pub prompt_flag: String,
    /// The `TAG` in `[TAG:STAGE:<name>]` markers.
    pub marker_tag: String,
    /// Credentials and other variables added to the inherited environment.
    pub env: HashMap<String, String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            base_args: vec![
                "--print".to_string(),
                "--output-format".to_string(),
                "stream-json".to_string(),
                "--verbose".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            continue_flag: "--continue".to_string(),
            prompt_flag: String::new(),
            marker_tag: "APPFORGE".to_string(),
            env: HashMap::new(),
        }
    }
}

/// Job record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Attempts for the initial "mark generating" write that races record creation.
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    /// Attempts for routine stage/detail writes.
    pub update_attempts: u32,
    pub update_retry_delay_ms: u64,
    /// Capacity of the background stage-update queue.
    pub queue_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay_ms: 1000,
            update_attempts: 2,
            update_retry_delay_ms: 250,
            queue_capacity: 256,
        }
    }
}

impl StoreConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn update_retry_delay(&self) -> Duration {
        Duration::from_millis(self.update_retry_delay_ms)
    }
}

/// Workspace preparation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Directory holding one workspace per job id.
    pub root: PathBuf,
    /// Optional template copied into fresh workspaces before generation.
    pub template_dir: Option<PathBuf>,
    pub install: CommandSpec,
    pub install_timeout_secs: u64,
    /// Fast incremental install run after a successful speculative install.
    pub sync: CommandSpec,
    pub sync_timeout_secs: u64,
    pub schema_sync: CommandSpec,
    pub schema_timeout_secs: u64,
    /// Runner for seed scripts; the script path is appended.
    pub seed_runner: CommandSpec,
    /// Candidate seed script paths, relative to the workspace.
    pub seed_scripts: Vec<PathBuf>,
    pub seed_timeout_secs: u64,
    /// Local ephemeral database used by schema sync, seed, and preview.
    pub database_url: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("workspaces"),
            template_dir: None,
            install: CommandSpec::new("npm", &["install", "--no-audit", "--no-fund"]),
            install_timeout_secs: 120,
            sync: CommandSpec::new(
                "npm",
                &["install", "--prefer-offline", "--no-audit", "--no-fund"],
            ),
            sync_timeout_secs: 60,
            schema_sync: CommandSpec::new(
                "npx",
                &["prisma", "db", "push", "--skip-generate", "--accept-data-loss"],
            ),
            schema_timeout_secs: 120,
            seed_runner: CommandSpec::new("npx", &["tsx"]),
            seed_scripts: vec![
                PathBuf::from("prisma/seed.ts"),
                PathBuf::from("prisma/seed.js"),
            ],
            seed_timeout_secs: 60,
            database_url: "file:./dev.db".to_string(),
        }
    }
}

impl WorkspaceConfig {
    /// Workspace directory for a job id. `None` unless the id is a single
    /// plain path segment, so it can never resolve outside `root`.
    pub fn workspace_for(&self, job_id: &str) -> Option<PathBuf> {
        let mut components = Path::new(job_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == job_id => Some(self.root.join(job_id)),
            _ => None,
        }
    }
}

/// Preview dev-server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub port: u16,
    /// Externally reachable URL; `{port}` is substituted.
    pub public_url: String,
    pub command: CommandSpec,
    pub ready_timeout_secs: u64,
    pub grace_period_secs: u64,
    /// Substrings in dev-server output that signal readiness.
    pub ready_patterns: Vec<String>,
    /// Variables removed from the inherited environment before spawn.
    pub strip_env: Vec<String>,
    /// Auth entry point overwritten with the preview-user session.
    pub auth_file: PathBuf,
    /// Middleware entry point overwritten with a pass-through.
    pub middleware_file: PathBuf,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            port: 3100,
            public_url: "http://localhost:{port}".to_string(),
            command: CommandSpec::new("npm", &["run", "dev", "--", "--port", "{port}"]),
            ready_timeout_secs: 30,
            grace_period_secs: 5,
            ready_patterns: vec![
                "Ready in".to_string(),
                "ready started server".to_string(),
                "Local:".to_string(),
            ],
            strip_env: [
                "DATABASE_URL",
                "NEXTAUTH_URL",
                "NEXTAUTH_SECRET",
                "AUTH_SECRET",
                "AUTH_URL",
                "VERCEL_URL",
                "PORT",
                "NODE_ENV",
                "ANTHROPIC_API_KEY",
                "CLAUDE_CODE_OAUTH_TOKEN",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            auth_file: PathBuf::from("src/lib/auth.ts"),
            middleware_file: PathBuf::from("src/middleware.ts"),
        }
    }
}

impl PreviewConfig {
    pub fn url(&self) -> String {
        self.public_url.replace("{port}", &self.port.to_string())
    }
}

/// HTTP control surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
    pub db_path: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 3140,
            db_path: PathBuf::from(".appforge/jobs.db"),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppforgeConfig {
    pub generator: GeneratorConfig,
    pub store: StoreConfig,
    pub workspace: WorkspaceConfig,
    pub preview: PreviewConfig,
    pub server: ServerSettings,
}

impl AppforgeConfig {
    /// Path of the config file for a project directory.
    pub fn path_for(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load config from `.appforge/appforge.toml` in the project directory.
    /// Returns defaults if the file doesn't exist.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = Self::path_for(project_dir);
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply `APPFORGE_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(cmd) = lookup("APPFORGE_GENERATOR_CMD") {
            self.generator.command = cmd;
        }
        if let Some(root) = lookup("APPFORGE_WORKSPACES_DIR") {
            self.workspace.root = PathBuf::from(root);
        }
        if let Some(port) = lookup("APPFORGE_PREVIEW_PORT") {
            self.preview.port = port
                .parse()
                .with_context(|| format!("Invalid APPFORGE_PREVIEW_PORT '{}'", port))?;
        }
        Ok(())
    }

    /// Resolve relative paths against the project directory.
    pub fn resolve_paths(&mut self, project_dir: &Path) {
        if self.workspace.root.is_relative() {
            self.workspace.root = project_dir.join(&self.workspace.root);
        }
        if let Some(template) = &self.workspace.template_dir
            && template.is_relative()
        {
            self.workspace.template_dir = Some(project_dir.join(template));
        }
        if self.server.db_path.is_relative() {
            self.server.db_path = project_dir.join(&self.server.db_path);
        }
    }

    /// Serialize for `appforge config show` / `config init`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_config_defaults() {
        let config = AppforgeConfig::default();
        assert_eq!(config.generator.command, "claude");
        assert_eq!(config.generator.marker_tag, "APPFORGE");
        assert_eq!(config.store.max_attempts, 5);
        assert_eq!(config.store.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.workspace.install_timeout_secs, 120);
        assert_eq!(config.workspace.sync_timeout_secs, 60);
        assert_eq!(config.preview.ready_timeout_secs, 30);
        assert_eq!(config.preview.url(), "http://localhost:3100");
    }

    #[test]
    fn test_config_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppforgeConfig::load(dir.path()).unwrap();
        assert_eq!(config.server.port, 3140);
    }

    #[test]
    fn test_config_load_partial() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(CONFIG_DIR);
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join(CONFIG_FILE),
            r#"
[generator]
command = "/usr/local/bin/gen"

[generator.env]
ANTHROPIC_API_KEY = "test-key"

[preview]
port = 4000

[preview.command]
program = "pnpm"
args = ["dev", "--port", "{port}"]
"#,
        )
        .unwrap();

        let config = AppforgeConfig::load(dir.path()).unwrap();
        assert_eq!(config.generator.command, "/usr/local/bin/gen");
        assert_eq!(config.generator.env.get("ANTHROPIC_API_KEY").unwrap(), "test-key");
        assert_eq!(config.generator.continue_flag, "--continue"); // default
        assert_eq!(config.preview.port, 4000);
        assert_eq!(config.preview.command.args_with_port(4000), vec!["dev", "--port", "4000"]);
        assert_eq!(config.preview.grace_period_secs, 5); // default
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(CONFIG_DIR);
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join(CONFIG_FILE), "not valid toml {{{{").unwrap();

        assert!(AppforgeConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppforgeConfig::default();
        config
            .apply_overrides_from(|key| match key {
                "APPFORGE_GENERATOR_CMD" => Some("fake-gen".to_string()),
                "APPFORGE_PREVIEW_PORT" => Some("4500".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.generator.command, "fake-gen");
        assert_eq!(config.preview.port, 4500);
        assert_eq!(config.workspace.root, PathBuf::from("workspaces"));
    }

    #[test]
    fn test_env_override_rejects_bad_port() {
        let mut config = AppforgeConfig::default();
        let result = config.apply_overrides_from(|key| {
            (key == "APPFORGE_PREVIEW_PORT").then(|| "not-a-port".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_paths_joins_relative() {
        let mut config = AppforgeConfig::default();
        config.resolve_paths(Path::new("/srv/app"));
        assert_eq!(config.workspace.root, PathBuf::from("/srv/app/workspaces"));
        assert_eq!(config.server.db_path, PathBuf::from("/srv/app/.appforge/jobs.db"));
        assert_eq!(
            config.workspace.workspace_for("job-1"),
            Some(PathBuf::from("/srv/app/workspaces/job-1"))
        );
    }

    #[test]
    fn test_workspace_for_rejects_path_segments() {
        let config = WorkspaceConfig::default();
        for id in ["../outside", "..", ".", "", "a/b", "/etc", "job-1/", "./job-1"] {
            assert!(config.workspace_for(id).is_none(), "accepted {:?}", id);
        }
        assert!(config.workspace_for("5f0c2a9e-job").is_some());
    }

    #[test]
    fn test_to_toml_round_trips_through_parse() {
        let config = AppforgeConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = AppforgeConfig::parse(&text).unwrap();
        assert_eq!(parsed.preview.command, config.preview.command);
    }
}
