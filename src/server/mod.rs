pub mod api;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::AppforgeConfig;
use crate::service::Orchestrator;
use crate::store::SqliteJobStore;

pub use api::{AppState, SharedState};

/// Network settings for the HTTP control surface.
pub struct ServerConfig {
    pub port: u16,
    /// Bind on all interfaces and allow any origin.
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3140,
            dev_mode: false,
        }
    }
}

pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Open the job database, build the orchestrator, and serve until Ctrl+C.
pub async fn start_server(config: AppforgeConfig, server: ServerConfig) -> Result<()> {
    let jobs = SqliteJobStore::new(&config.server.db_path)
        .context("Failed to initialize job database")?;
    std::fs::create_dir_all(&config.workspace.root).with_context(|| {
        format!(
            "Failed to create workspaces directory {}",
            config.workspace.root.display()
        )
    })?;

    let orchestrator = Arc::new(Orchestrator::new(config, Arc::new(jobs.clone())));
    let state = Arc::new(AppState {
        jobs,
        orchestrator: Arc::clone(&orchestrator),
    });

    let mut app = build_router(state);
    if server.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if server.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "appforge control surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    orchestrator.shutdown().await;
    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
