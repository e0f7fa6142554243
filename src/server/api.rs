use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use crate::errors::JobError;
use crate::service::Orchestrator;
use crate::store::SqliteJobStore;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub jobs: SqliteJobStore,
    pub orchestrator: Arc<Orchestrator>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateJobRequest {
    pub prompt: String,
    pub business_context: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateIterationRequest {
    pub prompt: String,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::WorkspaceMissing { .. } => ApiError::NotFound(err.to_string()),
            JobError::InvalidJobId { .. } => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/jobs", post(create_job))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/iterations", post(create_iteration))
        .route(
            "/api/jobs/{id}/preview",
            post(start_preview).get(preview_status).delete(stop_preview),
        )
        .route("/health", get(health_check))
}

fn require_prompt(prompt: &str) -> Result<(), ApiError> {
    if prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".to_string()));
    }
    Ok(())
}

async fn require_job(state: &AppState, id: &str) -> Result<(), ApiError> {
    let job = state
        .jobs
        .get_job(id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    match job {
        Some(_) => Ok(()),
        None => Err(ApiError::NotFound(format!("Job {} not found", id))),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "active_jobs": state.orchestrator.active_jobs(),
    }))
}

async fn create_job(
    State(state): State<SharedState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_prompt(&req.prompt)?;
    let id = uuid::Uuid::new_v4().to_string();
    let record = state
        .jobs
        .create_job(&id, &req.prompt)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    // The outcome is persisted by the job itself.
    let _job = state
        .orchestrator
        .start_generation(&id, &req.prompt, req.business_context)?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

async fn get_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .jobs
        .get_job(&id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    match job {
        Some(job) => Ok(Json(job)),
        None => Err(ApiError::NotFound(format!("Job {} not found", id))),
    }
}

async fn create_iteration(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<CreateIterationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_prompt(&req.prompt)?;
    require_job(&state, &id).await?;
    if !state.orchestrator.workspace_for(&id)?.is_dir() {
        return Err(ApiError::NotFound(format!("Workspace for job {} not found", id)));
    }

    let iteration_id = uuid::Uuid::new_v4().to_string();
    let record = state
        .jobs
        .create_job(&iteration_id, &req.prompt)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let _job = state
        .orchestrator
        .start_iteration(&id, &iteration_id, &req.prompt)?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

async fn start_preview(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_job(&state, &id).await?;
    let accepted = state.orchestrator.start_preview(&id)?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn preview_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.orchestrator.preview_status(&id) {
        Some(status) => Ok(Json(status)),
        None => Err(ApiError::NotFound(format!("No active preview for job {}", id))),
    }
}

async fn stop_preview(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let stopped = state.orchestrator.stop_preview(&id).await;
    Json(serde_json::json!({ "stopped": stopped }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppforgeConfig, CommandSpec};
    use crate::models::{JobRecord, JobStatus};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct TestApp {
        _root: tempfile::TempDir,
        state: SharedState,
    }

    impl TestApp {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let mut config = AppforgeConfig::default();
            config.generator.command = "sh".to_string();
            config.generator.base_args = vec!["-c".to_string(), "exit 0".to_string(), "gen".to_string()];
            config.store.retry_delay_ms = 0;
            config.workspace.root = root.path().join("workspaces");
            config.workspace.install = CommandSpec::new("true", &[]);
            config.workspace.schema_sync = CommandSpec::new("true", &[]);
            config.preview.command = CommandSpec::new("sh", &["-c", "echo 'Ready in'; exec sleep 30"]);
            config.preview.grace_period_secs = 1;

            let jobs = SqliteJobStore::new_in_memory().unwrap();
            let orchestrator = Arc::new(Orchestrator::new(config, Arc::new(jobs.clone())));
            Self {
                _root: root,
                state: Arc::new(AppState { jobs, orchestrator }),
            }
        }

        fn router(&self) -> Router {
            api_router().with_state(Arc::clone(&self.state))
        }

        async fn send(&self, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
            let builder = Request::builder().method(method).uri(uri);
            let req = match body {
                Some(json) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(json.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            let resp = self.router().oneshot(req).await.unwrap();
            let status = resp.status();
            let bytes = resp.into_body().collect().await.unwrap().to_bytes();
            let json = if bytes.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, json)
        }
    }

    async fn wait_for_status(app: &TestApp, id: &str, status: JobStatus) {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
        loop {
            let (_, json) = app.send("GET", &format!("/api/jobs/{}", id), None).await;
            let record: JobRecord = serde_json::from_value(json).unwrap();
            if record.status == status {
                return;
            }
            assert!(tokio::time::Instant::now() < deadline, "job {} stuck in {:?}", id, record.status);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_health_reports_active_jobs() {
        let app = TestApp::new();
        let (status, json) = app.send("GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["active_jobs"], 0);
    }

    #[tokio::test]
    async fn test_create_job_runs_to_completion() {
        let app = TestApp::new();
        let (status, json) = app
            .send("POST", "/api/jobs", Some(serde_json::json!({"prompt": "a habit tracker"})))
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["prompt"], "a habit tracker");
        let id = json["id"].as_str().unwrap().to_string();

        wait_for_status(&app, &id, JobStatus::Complete).await;
    }

    #[tokio::test]
    async fn test_create_job_rejects_empty_prompt() {
        let app = TestApp::new();
        let (status, json) = app
            .send("POST", "/api/jobs", Some(serde_json::json!({"prompt": "  "})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("prompt"));
    }

    #[tokio::test]
    async fn test_get_unknown_job_is_404() {
        let app = TestApp::new();
        let (status, _) = app.send("GET", "/api/jobs/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_iteration_on_unknown_job_is_404() {
        let app = TestApp::new();
        let (status, _) = app
            .send("POST", "/api/jobs/nope/iterations", Some(serde_json::json!({"prompt": "more"})))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_iteration_after_generation() {
        let app = TestApp::new();
        let (_, json) = app
            .send("POST", "/api/jobs", Some(serde_json::json!({"prompt": "a blog"})))
            .await;
        let id = json["id"].as_str().unwrap().to_string();
        wait_for_status(&app, &id, JobStatus::Complete).await;

        let (status, json) = app
            .send(
                "POST",
                &format!("/api/jobs/{}/iterations", id),
                Some(serde_json::json!({"prompt": "add tags"})),
            )
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let iteration_id = json["id"].as_str().unwrap().to_string();
        assert_ne!(iteration_id, id);
        wait_for_status(&app, &iteration_id, JobStatus::Complete).await;
    }

    #[tokio::test]
    async fn test_preview_routes() {
        let app = TestApp::new();
        let (status, _) = app.send("GET", "/api/jobs/job-1/preview", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app.send("POST", "/api/jobs/job-1/preview", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // A record alone is not enough; the workspace must exist too.
        app.state.jobs.create_job("job-1", "a blog").await.unwrap();
        let (status, _) = app.send("POST", "/api/jobs/job-1/preview", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        std::fs::create_dir_all(app.state.orchestrator.workspace_for("job-1").unwrap()).unwrap();
        let (status, json) = app.send("POST", "/api/jobs/job-1/preview", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["status"], "starting");
        assert_eq!(json["url"], "http://localhost:3100");

        let (status, json) = app.send("GET", "/api/jobs/job-1/preview", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["job_id"], "job-1");

        let (status, json) = app.send("DELETE", "/api/jobs/other/preview", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["stopped"], false);

        app.state.orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_preview_rejects_traversal_ids() {
        let app = TestApp::new();
        let outside = app._root.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();

        // No record for the id: 404 before anything touches the filesystem.
        let (status, _) = app.send("POST", "/api/jobs/..%2Foutside/preview", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Even with a matching record the id is rejected.
        app.state.jobs.create_job("../outside", "x").await.unwrap();
        let (status, json) = app.send("POST", "/api/jobs/..%2Foutside/preview", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("Invalid job id"));
        let (status, _) = app
            .send(
                "POST",
                "/api/jobs/..%2Foutside/iterations",
                Some(serde_json::json!({"prompt": "more"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(!outside.join("src/lib/auth.ts").exists());
        assert!(!outside.join("src/middleware.ts").exists());
        assert!(app.state.orchestrator.preview_status("../outside").is_none());
    }
}
