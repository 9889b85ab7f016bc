/// Server setup and initialization
///
/// Wires together all components: database, workflow storage and registry,
/// the worker client, the execution engine, and HTTP routes.

use crate::{
    api::{create_run_routes, create_workflow_routes, AppState},
    config::Config,
    database::open_pool,
    history::RunStorage,
    runtime::{engine::ExecutionEngine, worker::HttpTaskBackend},
    workflow::{registry::WorkflowRegistry, storage::WorkflowStorage},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Build the router over an already assembled state
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        // Workflow management API routes
        .merge(create_workflow_routes())
        // Run, single-node and history routes
        .merge(create_run_routes())
        .with_state(state)
}

/// Create the main Axum application with all routes
///
/// Opens the database, loads stored workflows into the registry and connects
/// the execution engine to the configured worker pool.
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("🗄️ Initializing database in {}", config.database.data_dir);
    let pool = open_pool(&config.database)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;

    tracing::info!("📋 Initializing workflow storage");
    let workflow_storage = WorkflowStorage::new(pool.clone());

    tracing::info!("📊 Initializing workflow registry");
    let workflow_registry = Arc::new(WorkflowRegistry::new(workflow_storage.clone()));

    tracing::info!("📥 Loading existing workflows from storage");
    workflow_registry
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load workflows from storage: {}", e))?;

    tracing::info!("🔌 Connecting to worker pool at {}", config.worker.base_url);
    if config.worker.secret_key.is_none() {
        tracing::warn!("⚠️ No worker secret configured; task triggers will be unauthenticated");
    }
    let backend = Arc::new(HttpTaskBackend::new(&config.worker));

    tracing::info!("🚀 Initializing execution engine");
    let engine = Arc::new(ExecutionEngine::new(
        backend,
        RunStorage::new(pool),
        config.worker.trigger_timeout(),
    ));

    let app = build_router(AppState {
        storage: workflow_storage,
        registry: workflow_registry,
        engine,
    });

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration
///
/// Log verbosity follows `RUST_LOG` (default `info`).
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting canvasflow server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
