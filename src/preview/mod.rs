//! Single live preview dev server.
//!
//! At most one preview process exists at any instant. Starting a preview
//! holds the session slot across the whole teardown → patch → install →
//! spawn sequence, so a second `start` cannot spawn until the first process
//! has been reaped.
//!
//! Every start request is numbered and published before it waits for the
//! slot. Only the newest published request may launch; a `stop` for its job
//! withdraws it, so a stop that arrives while a start is still queued wins.
//!
//! Each session's child process is owned by a monitor task. The monitor
//! watches combined stdout/stderr for a readiness pattern, marks the session
//! ready optimistically after the ready timeout, records early exits as
//! failures, and performs the SIGTERM → grace period → SIGKILL teardown when
//! told to stop.

pub mod patch;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::PreviewConfig;
use crate::errors::PreviewError;
use crate::runner::TailBuffer;
use crate::workspace::WorkspacePreparer;

pub use patch::apply_preview_auth_bypass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewState {
    Starting,
    Ready,
    Failed,
}

/// Snapshot of the active preview session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewStatus {
    pub job_id: String,
    pub status: PreviewState,
    pub url: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
}

type SharedStatus = Arc<std::sync::Mutex<PreviewStatus>>;

fn read_status(status: &SharedStatus) -> PreviewStatus {
    status.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

fn update_status(status: &SharedStatus, f: impl FnOnce(&mut PreviewStatus)) {
    let mut guard = status.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut guard);
}

struct PreviewSession {
    job_id: String,
    request: u64,
    status: SharedStatus,
    /// `None` for sessions whose process never spawned.
    stop_tx: Option<oneshot::Sender<()>>,
    monitor: Option<JoinHandle<()>>,
}

impl PreviewSession {
    /// Stop the process and wait until the monitor has reaped it.
    async fn teardown(self) {
        if let Some(stop_tx) = self.stop_tx {
            let _ = stop_tx.send(());
        }
        if let Some(monitor) = self.monitor
            && let Err(e) = monitor.await
        {
            tracing::error!(job_id = %self.job_id, "preview monitor task panicked: {}", e);
        }
        tracing::info!(job_id = %self.job_id, "preview torn down");
    }
}

/// Status of the newest accepted start request.
struct Published {
    request: u64,
    status: SharedStatus,
}

pub struct PreviewManager {
    config: PreviewConfig,
    preparer: WorkspacePreparer,
    slot: Mutex<Option<PreviewSession>>,
    /// Readable while `slot` is held. A start request only launches while it
    /// is still the published one; `stop` and newer starts withdraw it.
    current: std::sync::Mutex<Option<Published>>,
    next_request: AtomicU64,
}

impl PreviewManager {
    pub fn new(config: PreviewConfig, preparer: WorkspacePreparer) -> Self {
        Self {
            config,
            preparer,
            slot: Mutex::new(None),
            current: std::sync::Mutex::new(None),
            next_request: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    fn published(&self) -> std::sync::MutexGuard<'_, Option<Published>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Accept a start request for `job_id` and make its `Starting` status
    /// the visible one.
    fn publish(&self, job_id: &str) -> (u64, SharedStatus) {
        let request = self.next_request.fetch_add(1, Ordering::SeqCst);
        let status = Arc::new(std::sync::Mutex::new(PreviewStatus {
            job_id: job_id.to_string(),
            status: PreviewState::Starting,
            url: self.config.url(),
            port: self.config.port,
            error: None,
            started_at: Utc::now(),
        }));
        *self.published() = Some(Published {
            request,
            status: Arc::clone(&status),
        });
        (request, status)
    }

    fn is_current(&self, request: u64) -> bool {
        self.published()
            .as_ref()
            .is_some_and(|published| published.request == request)
    }

    /// Clear the visible status if it belongs to `job_id`.
    fn withdraw(&self, job_id: &str) -> bool {
        let mut current = self.published();
        let matches = current
            .as_ref()
            .is_some_and(|published| read_status(&published.status).job_id == job_id);
        if matches {
            *current = None;
        }
        matches
    }

    /// Make a still-running session visible again after the request that
    /// displaced it was withdrawn.
    fn republish(&self, session: &PreviewSession) {
        let mut current = self.published();
        if current.is_none() {
            *current = Some(Published {
                request: session.request,
                status: Arc::clone(&session.status),
            });
        }
    }

    /// Replace any running preview with one for `job_id`.
    ///
    /// Returns once the dev server has been spawned (status `Starting`).
    /// Readiness is reported through [`PreviewManager::status`].
    pub async fn start(&self, job_id: &str, workspace: &Path) -> Result<PreviewStatus, PreviewError> {
        let (request, status) = self.publish(job_id);
        self.run_start(request, job_id, workspace, status).await
    }

    /// Accept a preview request and run the start on a background task. The
    /// returned status is always `Starting`.
    pub fn start_in_background(self: &Arc<Self>, job_id: &str, workspace: PathBuf) -> PreviewStatus {
        let (request, status) = self.publish(job_id);
        let accepted = read_status(&status);

        let manager = Arc::clone(self);
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = manager.run_start(request, &job_id, &workspace, status).await {
                tracing::warn!(job_id = %job_id, error = %e, "background preview start failed");
            }
        });
        accepted
    }

    async fn run_start(
        &self,
        request: u64,
        job_id: &str,
        workspace: &Path,
        status: SharedStatus,
    ) -> Result<PreviewStatus, PreviewError> {
        let mut slot = self.slot.lock().await;
        if !self.is_current(request) {
            if let Some(active) = slot.as_ref() {
                self.republish(active);
            }
            tracing::info!(job_id, "preview request withdrawn before launch");
            return Err(PreviewError::Withdrawn(job_id.to_string()));
        }

        if let Some(previous) = slot.take() {
            tracing::info!(
                previous = %previous.job_id,
                next = %job_id,
                "replacing active preview"
            );
            previous.teardown().await;
            if !self.is_current(request) {
                tracing::info!(job_id, "preview request withdrawn during teardown");
                return Err(PreviewError::Withdrawn(job_id.to_string()));
            }
        }

        let launched = if workspace.is_dir() {
            self.launch(job_id, workspace, &status).await
        } else {
            Err(PreviewError::WorkspaceMissing(workspace.to_path_buf()))
        };

        match launched {
            Ok((stop_tx, monitor)) => {
                *slot = Some(PreviewSession {
                    job_id: job_id.to_string(),
                    request,
                    status: Arc::clone(&status),
                    stop_tx: Some(stop_tx),
                    monitor: Some(monitor),
                });
                Ok(read_status(&status))
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "preview failed to start");
                update_status(&status, |s| {
                    s.status = PreviewState::Failed;
                    s.error = Some(e.to_string());
                });
                *slot = Some(PreviewSession {
                    job_id: job_id.to_string(),
                    request,
                    status,
                    stop_tx: None,
                    monitor: None,
                });
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        job_id: &str,
        workspace: &Path,
        status: &SharedStatus,
    ) -> Result<(oneshot::Sender<()>, JoinHandle<()>), PreviewError> {
        apply_preview_auth_bypass(workspace, &self.config).map_err(PreviewError::PatchFailed)?;

        if workspace.join("node_modules").is_dir() {
            tracing::debug!(job_id, "dependencies present, skipping install");
        } else {
            let report = self.preparer.install_dependencies(workspace).await;
            if !report.is_success() {
                tracing::warn!(job_id, ?report, "preview dependency install failed, starting anyway");
            }
        }

        let child = self.spawn_dev_server(workspace)?;
        tracing::info!(
            job_id,
            port = self.config.port,
            pid = child.id().unwrap_or(0),
            "preview dev server spawned"
        );

        let (stop_tx, stop_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor_session(
            child,
            Arc::clone(status),
            self.config.ready_patterns.clone(),
            Duration::from_secs(self.config.ready_timeout_secs),
            Duration::from_secs(self.config.grace_period_secs),
            stop_rx,
        ));
        Ok((stop_tx, monitor))
    }

    fn spawn_dev_server(&self, workspace: &Path) -> Result<Child, PreviewError> {
        let spec = &self.config.command;
        let mut cmd = Command::new(&spec.program);
        cmd.args(spec.args_with_port(self.config.port))
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in &self.config.strip_env {
            cmd.env_remove(key);
        }
        cmd.env("PORT", self.config.port.to_string())
            .env("NODE_ENV", "development")
            .env("DATABASE_URL", &self.preparer.config().database_url);
        // Own process group so teardown reaches the server's children too.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn().map_err(|source| PreviewError::SpawnFailed {
            program: spec.program.clone(),
            source,
        })
    }

    /// Status of the active session, if it belongs to `job_id`.
    pub fn status(&self, job_id: &str) -> Option<PreviewStatus> {
        self.published()
            .as_ref()
            .map(|published| read_status(&published.status))
            .filter(|status| status.job_id == job_id)
    }

    /// Tear down the session for `job_id`, or cancel its pending start.
    pub async fn stop(&self, job_id: &str) -> bool {
        // Withdraw before waiting for the slot so a queued start never launches.
        let withdrawn = self.withdraw(job_id);
        let mut slot = self.slot.lock().await;
        let stopped = match slot.take_if(|session| session.job_id == job_id) {
            Some(session) => {
                session.teardown().await;
                true
            }
            None => false,
        };
        withdrawn || stopped
    }

    /// Tear down whatever is running and cancel any pending start.
    pub async fn shutdown(&self) {
        *self.published() = None;
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.take() {
            session.teardown().await;
        }
    }
}

/// Forward each line of `reader` into `tx` until EOF or the receiver closes.
async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

async fn monitor_session(
    mut child: Child,
    status: SharedStatus,
    ready_patterns: Vec<String>,
    ready_timeout: Duration,
    grace: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let job_id = read_status(&status).job_id;
    let (line_tx, mut line_rx) = mpsc::channel::<String>(256);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, line_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, line_tx.clone()));
    }
    drop(line_tx);

    let mut output = TailBuffer::default();
    let ready_deadline = tokio::time::sleep(ready_timeout);
    tokio::pin!(ready_deadline);
    let mut deadline_passed = false;

    let stop_requested = loop {
        tokio::select! {
            _ = &mut stop_rx => break true,
            exit = child.wait() => {
                // Pick up output still in the pipes.
                while let Ok(Some(line)) =
                    tokio::time::timeout(Duration::from_millis(500), line_rx.recv()).await
                {
                    output.push_line(&line);
                }
                let code = exit.ok().and_then(|s| s.code());
                let was_ready = read_status(&status).status == PreviewState::Ready;
                let error = if was_ready {
                    format!("Dev server exited with code {:?}: {}", code, output.as_str().trim())
                } else {
                    PreviewError::ExitedBeforeReady(output.as_str().trim().to_string()).to_string()
                };
                tracing::warn!(job_id = %job_id, exit_code = ?code, was_ready, "preview dev server exited");
                update_status(&status, |s| {
                    s.status = PreviewState::Failed;
                    s.error = Some(error);
                });
                break false;
            }
            Some(line) = line_rx.recv() => {
                output.push_line(&line);
                if ready_patterns.iter().any(|p| line.contains(p.as_str())) {
                    mark_ready(&status, &job_id, "readiness pattern");
                }
            }
            _ = &mut ready_deadline, if !deadline_passed => {
                deadline_passed = true;
                mark_ready(&status, &job_id, "ready timeout elapsed");
            }
        }
    };

    if stop_requested {
        terminate(&mut child, grace, &job_id).await;
    }
}

fn mark_ready(status: &SharedStatus, job_id: &str, reason: &str) {
    let mut guard = status.lock().unwrap_or_else(|e| e.into_inner());
    if guard.status == PreviewState::Starting {
        guard.status = PreviewState::Ready;
        tracing::info!(job_id, reason, url = %guard.url, "preview ready");
    }
}

/// SIGTERM the process group, wait out the grace period, then SIGKILL and reap.
async fn terminate(child: &mut Child, grace: Duration, job_id: &str) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        signal_group(pid, libc::SIGTERM);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(_) => {
                // Leader is gone; make sure nothing else in its group survives.
                signal_group(pid, libc::SIGKILL);
                return;
            }
            Err(_) => {
                tracing::warn!(job_id, grace_secs = grace.as_secs(), "preview ignored SIGTERM, killing");
                signal_group(pid, libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        tracing::debug!(job_id, error = %e, "kill after grace period failed");
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions. The negative pid
    // addresses the process group created at spawn.
    unsafe {
        libc::kill(-pid, signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommandSpec, WorkspaceConfig};
    use std::fs;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", &["-c", script])
    }

    fn manager(dev_server: &str) -> Arc<PreviewManager> {
        manager_with(PreviewConfig {
            command: sh(dev_server),
            ready_timeout_secs: 10,
            grace_period_secs: 1,
            ..Default::default()
        })
    }

    fn manager_with(config: PreviewConfig) -> Arc<PreviewManager> {
        let preparer = WorkspacePreparer::new(WorkspaceConfig {
            install: sh("mkdir -p node_modules"),
            ..Default::default()
        });
        Arc::new(PreviewManager::new(config, preparer))
    }

    async fn wait_for_state(
        manager: &PreviewManager,
        job_id: &str,
        state: PreviewState,
    ) -> PreviewStatus {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(status) = manager.status(job_id)
                && status.status == state
            {
                return status;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "preview {} never reached {:?}: {:?}",
                job_id,
                state,
                manager.status(job_id)
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn read_pid(path: &Path) -> i32 {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(text) = fs::read_to_string(path)
                && let Ok(pid) = text.trim().parse()
            {
                return pid;
            }
            assert!(std::time::Instant::now() < deadline, "pid file never written");
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    fn is_alive(pid: i32) -> bool {
        unsafe { libc::kill(pid, 0) == 0 }
    }

    #[tokio::test]
    async fn test_status_unknown_when_never_started() {
        let manager = manager("exit 0");
        assert!(manager.status("job-1").is_none());
        assert!(!manager.stop("job-1").await);
    }

    #[tokio::test]
    async fn test_ready_pattern_marks_ready() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager("echo 'starting'; echo '  ✓ Ready in 812ms'; exec sleep 30");

        let started = manager.start("job-1", dir.path()).await.unwrap();
        assert_eq!(started.status, PreviewState::Starting);
        assert_eq!(started.url, "http://localhost:3100");

        let ready = wait_for_state(&manager, "job-1", PreviewState::Ready).await;
        assert!(ready.error.is_none());
        assert!(manager.status("other-job").is_none());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_patch_applied_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        // The server only starts if the bypass is already in place.
        let manager = manager("grep -q preview-user src/lib/auth.ts || exit 7; echo 'Ready in'; exec sleep 30");
        manager.start("job-1", dir.path()).await.unwrap();
        wait_for_state(&manager, "job-1", PreviewState::Ready).await;
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_optimistic_ready_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(PreviewConfig {
            command: sh("exec sleep 30"),
            ready_timeout_secs: 1,
            grace_period_secs: 1,
            ..Default::default()
        });
        manager.start("job-1", dir.path()).await.unwrap();
        wait_for_state(&manager, "job-1", PreviewState::Ready).await;
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_exit_before_ready_is_failed_with_output() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager("echo 'Module not found: prisma' >&2; exit 1");
        manager.start("job-1", dir.path()).await.unwrap();

        let failed = wait_for_state(&manager, "job-1", PreviewState::Failed).await;
        assert!(failed.error.unwrap().contains("Module not found"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported_in_status() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(PreviewConfig {
            command: CommandSpec::new("/no/such/dev-server", &[]),
            ..Default::default()
        });
        let err = manager.start("job-1", dir.path()).await.unwrap_err();
        assert!(matches!(err, PreviewError::SpawnFailed { .. }));
        let status = manager.status("job-1").unwrap();
        assert_eq!(status.status, PreviewState::Failed);
        assert!(status.error.is_some());
    }

    #[tokio::test]
    async fn test_missing_workspace_rejected() {
        let manager = manager("exit 0");
        let err = manager
            .start("job-1", Path::new("/definitely/not/a/workspace"))
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::WorkspaceMissing(_)));
        let status = manager.status("job-1").unwrap();
        assert_eq!(status.status, PreviewState::Failed);
        assert!(status.error.unwrap().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_background_start_with_missing_workspace_fails() {
        let manager = manager("exit 0");
        manager.start_in_background("job-1", PathBuf::from("/definitely/not/a/workspace"));
        let failed = wait_for_state(&manager, "job-1", PreviewState::Failed).await;
        assert!(failed.error.unwrap().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_previous_preview_torn_down_before_workspace_check() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager("echo $$ > server.pid; echo 'Ready in'; exec sleep 30");
        manager.start("job-a", dir.path()).await.unwrap();
        let pid_a = read_pid(&dir.path().join("server.pid"));

        let err = manager
            .start("job-b", Path::new("/definitely/not/a/workspace"))
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::WorkspaceMissing(_)));
        assert!(!is_alive(pid_a));
        assert!(manager.status("job-a").is_none());
    }

    #[tokio::test]
    async fn test_stop_right_after_background_start_cancels_it() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager("echo $$ > server.pid; echo 'Ready in'; exec sleep 30");

        let accepted = manager.start_in_background("job-1", dir.path().to_path_buf());
        assert_eq!(accepted.status, PreviewState::Starting);
        assert!(manager.stop("job-1").await);
        assert!(manager.status("job-1").is_none());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(manager.status("job-1").is_none());
        assert!(!dir.path().join("server.pid").exists());
        assert!(!dir.path().join("src/lib/auth.ts").exists());
    }

    #[tokio::test]
    async fn test_withdrawn_start_leaves_running_preview_visible() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let manager = manager("echo $$ > server.pid; echo 'Ready in'; exec sleep 30");
        manager.start("job-a", a.path()).await.unwrap();
        let pid_a = read_pid(&a.path().join("server.pid"));

        manager.start_in_background("job-b", b.path().to_path_buf());
        assert!(manager.status("job-a").is_none());
        assert!(manager.stop("job-b").await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(is_alive(pid_a));
        assert!(manager.status("job-a").is_some());
        assert!(!b.path().join("server.pid").exists());
        manager.shutdown().await;
        assert!(!is_alive(pid_a));
    }

    #[tokio::test]
    async fn test_second_preview_replaces_first() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let manager = manager("echo $$ > server.pid; echo 'Ready in'; exec sleep 30");

        manager.start("job-a", a.path()).await.unwrap();
        let pid_a = read_pid(&a.path().join("server.pid"));
        assert!(is_alive(pid_a));

        manager.start("job-b", b.path()).await.unwrap();
        // Teardown of A completes before B is spawned.
        assert!(!is_alive(pid_a));
        assert!(manager.status("job-a").is_none());
        assert!(manager.status("job-b").is_some());

        let pid_b = read_pid(&b.path().join("server.pid"));
        assert!(is_alive(pid_b));
        manager.shutdown().await;
        assert!(!is_alive(pid_b));
    }

    #[tokio::test]
    async fn test_stop_only_matching_job() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager("echo $$ > server.pid; echo 'Ready in'; exec sleep 30");
        manager.start("job-1", dir.path()).await.unwrap();
        let pid = read_pid(&dir.path().join("server.pid"));

        assert!(!manager.stop("job-2").await);
        assert!(is_alive(pid));

        assert!(manager.stop("job-1").await);
        assert!(!is_alive(pid));
        assert!(manager.status("job-1").is_none());
    }

    #[tokio::test]
    async fn test_sigterm_ignored_falls_back_to_kill() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager("trap '' TERM; echo $$ > server.pid; echo 'Ready in'; while true; do sleep 0.1; done");
        manager.start("job-1", dir.path()).await.unwrap();
        let pid = read_pid(&dir.path().join("server.pid"));

        let started = std::time::Instant::now();
        assert!(manager.stop("job-1").await);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn test_dev_server_environment() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(PreviewConfig {
            command: sh("echo \"$PORT $NODE_ENV $DATABASE_URL home=$HOME\" > env.txt; echo 'Ready in'; exec sleep 30"),
            port: 3999,
            strip_env: vec!["HOME".to_string()],
            grace_period_secs: 1,
            ..Default::default()
        });
        manager.start("job-1", dir.path()).await.unwrap();
        wait_for_state(&manager, "job-1", PreviewState::Ready).await;
        manager.shutdown().await;

        let env = fs::read_to_string(dir.path().join("env.txt")).unwrap();
        assert_eq!(env.trim(), "3999 development file:./dev.db home=");
    }

    #[tokio::test]
    async fn test_start_in_background_returns_starting_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager("sleep 0.3; echo 'Ready in'; exec sleep 30");
        let accepted = manager.start_in_background("job-1", dir.path().to_path_buf());
        assert_eq!(accepted.status, PreviewState::Starting);
        assert_eq!(manager.status("job-1").unwrap().status, PreviewState::Starting);

        wait_for_state(&manager, "job-1", PreviewState::Ready).await;
        manager.shutdown().await;
    }
}
