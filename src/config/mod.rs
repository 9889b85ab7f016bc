/// Configuration management for the canvasflow engine
///
/// Handles server configuration, database location, and the external worker
/// connection used to run active nodes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// External task worker configuration
    pub worker: WorkerConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding the SQLite file (default: "data")
    /// Creates: {data_dir}/canvasflow.db
    pub data_dir: String,
}

/// Connection settings for the external worker pool that runs
/// `generate-text`, `crop-image` and `extract-frame` jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Base URL of the task API (e.g., "https://api.trigger.dev")
    pub base_url: String,
    /// Bearer token sent with every worker request
    pub secret_key: Option<String>,
    /// Upper bound for a single trigger call; exceeding it fails the node
    pub trigger_timeout_ms: u64,
    /// Delay between two status polls of a running job
    pub poll_interval_ms: u64,
    /// Consecutive transport errors tolerated while polling before the job
    /// is resolved as failed
    pub max_poll_failures: u32,
}

impl WorkerConfig {
    pub fn trigger_timeout(&self) -> Duration {
        Duration::from_millis(self.trigger_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            base_url: env_or("CANVASFLOW_WORKER_URL", "http://localhost:3030"),
            secret_key: std::env::var("CANVASFLOW_WORKER_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            trigger_timeout_ms: env_parse("CANVASFLOW_TRIGGER_TIMEOUT_MS", 30_000),
            poll_interval_ms: env_parse("CANVASFLOW_POLL_INTERVAL_MS", 500),
            max_poll_failures: env_parse("CANVASFLOW_MAX_POLL_FAILURES", 5),
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("CANVASFLOW_HOST", "0.0.0.0"),
                port: env_parse("CANVASFLOW_PORT", 3004),
            },
            database: DatabaseConfig {
                data_dir: env_or("CANVASFLOW_DATA_DIR", "data"),
            },
            worker: WorkerConfig::default(),
        }
    }
}
