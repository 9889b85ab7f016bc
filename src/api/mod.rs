/// HTTP API Layer
///
/// This module provides the REST API endpoints. It handles:
/// - Workflow CRUD operations and connection validation
/// - Run requests, single-node execution and run history

// Workflow management endpoints (POST/GET/PUT/DELETE)
pub mod workflows;

// Run execution and history endpoints
pub mod runs;

// Re-export router builders
pub use runs::create_run_routes;
pub use workflows::{create_workflow_routes, AppState};
