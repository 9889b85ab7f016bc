/// Canvasflow: layered DAG execution engine for multimodal node workflows
///
/// This library validates node connections at edit time, plans workflows into
/// dependency layers, and runs each layer's jobs on an external worker pool,
/// recording every run and node execution.

// Core configuration and setup
pub mod config;

// SQLite pool and schema
pub mod database;

// Workflow management layer - definitions, validation, storage, and registry
pub mod workflow;

// Run and node-execution records
pub mod history;

// Runtime execution engine - layer planning, dispatch, and run control
pub mod runtime;

// HTTP API layer - REST endpoints for workflows, runs and history
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use history::{RunStatus, RunStorage};
pub use runtime::{ExecutionEngine, NodeOutput, RunSummary, TaskBackend};
pub use server::start_server;
pub use workflow::{is_valid_connection, Edge, Node, NodeKind, Workflow};
