/// Canvasflow server entry point
///
/// Loads configuration from the environment and starts the HTTP server.

use canvasflow::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Workflow management API at /api/workflows/*
/// - Run requests and history at /api/workflows/{id}/runs and /api/runs/{run_id}
/// - Single-node execution at /api/nodes/execute
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
