use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};

use super::JobStore;
use crate::errors::StoreError;
use crate::models::{JobRecord, JobStatus, JobUpdate, Stage};

/// Async-safe handle to the job database.
///
/// Wraps the connection behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<Connection>>,
}

impl DbHandle {
    pub fn new(conn: Connection) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(conn)),
        }
    }

    /// Run a closure with access to the connection on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

/// SQLite-backed job record store.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: DbHandle,
}

impl SqliteJobStore {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        Self::from_connection(conn)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                prompt TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending',
                current_stage TEXT NOT NULL DEFAULT 'pending',
                current_detail TEXT,
                title TEXT,
                description TEXT,
                error TEXT,
                workspace_path TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            ",
        )
        .context("Failed to create tables")?;
        Ok(Self {
            db: DbHandle::new(conn),
        })
    }

    pub fn handle(&self) -> &DbHandle {
        &self.db
    }

    /// Insert a new pending job record.
    pub async fn create_job(&self, id: &str, prompt: &str) -> Result<JobRecord> {
        let id = id.to_string();
        let prompt = prompt.to_string();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO jobs (id, prompt) VALUES (?1, ?2)",
                    params![id, prompt],
                )
                .context("Failed to insert job")?;
                query_job(conn, &id)?.context("Job vanished after insert")
            })
            .await
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<JobRecord>> {
        let id = id.to_string();
        self.db.call(move |conn| query_job(conn, &id)).await
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn update(&self, job_id: &str, update: &JobUpdate) -> Result<(), StoreError> {
        let id = job_id.to_string();
        let update = update.clone();
        let changed = self
            .db
            .call(move |conn| {
                conn.execute(
                    "UPDATE jobs SET
                        status = COALESCE(?2, status),
                        current_stage = COALESCE(?3, current_stage),
                        current_detail = COALESCE(?4, current_detail),
                        title = COALESCE(?5, title),
                        description = COALESCE(?6, description),
                        error = COALESCE(?7, error),
                        workspace_path = COALESCE(?8, workspace_path),
                        updated_at = datetime('now')
                     WHERE id = ?1",
                    params![
                        id,
                        update.status.map(|s| s.as_str()),
                        update.current_stage.map(|s| s.as_str()),
                        update.current_detail,
                        update.title,
                        update.description,
                        update.error,
                        update.workspace_path,
                    ],
                )
                .context("Failed to update job")
            })
            .await
            .map_err(StoreError::Backend)?;

        if changed == 0 {
            return Err(StoreError::NotFound {
                job_id: job_id.to_string(),
            });
        }
        Ok(())
    }
}

fn query_job(conn: &Connection, id: &str) -> Result<Option<JobRecord>> {
    let row = conn
        .query_row(
            "SELECT id, prompt, status, current_stage, current_detail, title, description,
                    error, workspace_path, created_at, updated_at
             FROM jobs WHERE id = ?1",
            params![id],
            |row| {
                Ok(JobRow {
                    id: row.get(0)?,
                    prompt: row.get(1)?,
                    status: row.get(2)?,
                    current_stage: row.get(3)?,
                    current_detail: row.get(4)?,
                    title: row.get(5)?,
                    description: row.get(6)?,
                    error: row.get(7)?,
                    workspace_path: row.get(8)?,
                    created_at: row.get(9)?,
                    updated_at: row.get(10)?,
                })
            },
        )
        .optional()
        .context("Failed to query job")?;
    row.map(JobRow::into_record).transpose()
}

/// Intermediate row struct for reading jobs from SQLite before converting
/// string columns into typed enums.
struct JobRow {
    id: String,
    prompt: String,
    status: String,
    current_stage: String,
    current_detail: Option<String>,
    title: Option<String>,
    description: Option<String>,
    error: Option<String>,
    workspace_path: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn into_record(self) -> Result<JobRecord> {
        Ok(JobRecord {
            status: JobStatus::from_str(&self.status).map_err(|e| anyhow::anyhow!(e))?,
            current_stage: Stage::from_str(&self.current_stage).map_err(|e| anyhow::anyhow!(e))?,
            id: self.id,
            prompt: self.prompt,
            current_detail: self.current_detail,
            title: self.title,
            description: self.description,
            error: self.error,
            workspace_path: self.workspace_path,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppMetadata;

    #[tokio::test]
    async fn test_create_and_get_job() {
        let store = SqliteJobStore::new_in_memory().unwrap();
        let job = store.create_job("job-1", "Build a CRM").await.unwrap();
        assert_eq!(job.id, "job-1");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.current_stage, Stage::Pending);

        let fetched = store.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(fetched.prompt, "Build a CRM");
        assert!(store.get_job("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_job_is_not_found() {
        let store = SqliteJobStore::new_in_memory().unwrap();
        let err = store
            .update("ghost", &JobUpdate::stage(Stage::Coding))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_partial_updates_leave_other_fields() {
        let store = SqliteJobStore::new_in_memory().unwrap();
        store.create_job("job-2", "x").await.unwrap();

        store
            .update("job-2", &JobUpdate::generating("/ws/job-2"))
            .await
            .unwrap();
        store
            .update("job-2", &JobUpdate::stage(Stage::Coding))
            .await
            .unwrap();
        store
            .update("job-2", &JobUpdate::detail("Editing: app/page.tsx"))
            .await
            .unwrap();

        let job = store.get_job("job-2").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Generating);
        assert_eq!(job.current_stage, Stage::Coding);
        assert_eq!(job.workspace_path.as_deref(), Some("/ws/job-2"));
        assert_eq!(job.current_detail.as_deref(), Some("Editing: app/page.tsx"));
    }

    #[tokio::test]
    async fn test_terminal_updates() {
        let store = SqliteJobStore::new_in_memory().unwrap();
        store.create_job("ok", "x").await.unwrap();
        store.create_job("bad", "x").await.unwrap();

        let meta = AppMetadata {
            title: Some("Invoices".into()),
            description: Some("Track invoices".into()),
        };
        store.update("ok", &JobUpdate::complete(&meta)).await.unwrap();
        store
            .update("bad", &JobUpdate::stage(Stage::Database))
            .await
            .unwrap();
        store.update("bad", &JobUpdate::failed("boom")).await.unwrap();

        let ok = store.get_job("ok").await.unwrap().unwrap();
        assert_eq!(ok.status, JobStatus::Complete);
        assert_eq!(ok.current_stage, Stage::Complete);
        assert_eq!(ok.title.as_deref(), Some("Invoices"));

        let bad = store.get_job("bad").await.unwrap().unwrap();
        assert_eq!(bad.status, JobStatus::Failed);
        // Stage stays at the last persisted value on failure
        assert_eq!(bad.current_stage, Stage::Database);
        assert_eq!(bad.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_file_backed_store_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jobs.db");
        let store = SqliteJobStore::new(&path).unwrap();
        store.create_job("j", "p").await.unwrap();
        assert!(path.exists());
    }
}
