/// Workflow management REST API endpoints
///
/// Provides CRUD operations for workflow definitions with hot-reload support,
/// plus connection validation for the editor. Every save re-validates all
/// edges, so only valid DAGs ever reach the registry.

use crate::{
    runtime::engine::ExecutionEngine,
    workflow::{
        registry::WorkflowRegistry,
        storage::WorkflowStorage,
        types::{Edge, Workflow},
        validator::{check_connection, validate_workflow},
    },
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Workflow storage for persistence
    pub storage: WorkflowStorage,
    /// Hot-reload registry for in-memory workflows
    pub registry: Arc<WorkflowRegistry>,
    /// Run controller, also owning run history storage
    pub engine: Arc<ExecutionEngine>,
}

/// Response for workflow creation/update operations
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
}

/// Request body for workflow creation
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub workflow: Workflow,
}

/// Result of a connection check
#[derive(Debug, Serialize)]
pub struct ConnectionCheck {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Create workflow management routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route(
            "/api/workflows/{id}/connections/validate",
            post(validate_connection),
        )
}

/// Validate then persist and hot-reload a workflow
async fn save_and_reload(state: &AppState, workflow: &Workflow) -> Result<(), ApiError> {
    if let Err(reason) = validate_workflow(workflow) {
        tracing::warn!("🚫 Rejected workflow '{}': {}", workflow.id, reason);
        return Err(api_error(StatusCode::UNPROCESSABLE_ENTITY, reason.to_string()));
    }

    if let Err(e) = state.storage.save_workflow(workflow).await {
        tracing::error!("Failed to save workflow: {}", e);
        return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to save workflow"));
    }

    if let Err(e) = state.registry.reload_workflow(&workflow.id).await {
        tracing::error!("Failed to reload workflow into registry: {}", e);
        return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to reload workflow"));
    }

    Ok(())
}

/// Create a new workflow
///
/// POST /api/workflows
/// Body: { "workflow": { "id": "...", "name": "...", "nodes": [...], "edges": [...] } }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let workflow = payload.workflow;

    if workflow.id.is_empty() || workflow.name.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "workflow id and name are required"));
    }

    match state.storage.get_workflow(&workflow.id).await {
        Ok(Some(_)) => {
            return Err(api_error(
                StatusCode::CONFLICT,
                format!("workflow '{}' already exists", workflow.id),
            ))
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!("Failed to look up workflow {}: {}", workflow.id, e);
            return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "storage error"));
        }
    }

    save_and_reload(&state, &workflow).await?;

    tracing::info!("🔥 Created workflow: {} ({})", workflow.id, workflow.name);

    Ok(Json(WorkflowResponse {
        id: workflow.id.clone(),
        message: format!("Workflow '{}' created successfully", workflow.name),
    }))
}

/// List all workflows
///
/// GET /api/workflows
/// Returns: { "workflows": [{ "id": "...", "name": "...", "created_at": "...", "updated_at": "..." }] }
async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    match state.storage.list_workflows().await {
        Ok(workflows) => Ok(Json(json!({ "workflows": workflows }))),
        Err(e) => {
            tracing::error!("Failed to list workflows: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Get a specific workflow by ID
///
/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, StatusCode> {
    match state.storage.get_workflow(&id).await {
        Ok(Some(workflow)) => Ok(Json(workflow)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to get workflow {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Update an existing workflow
///
/// PUT /api/workflows/{id}
/// Runs already in flight keep the snapshot they started with.
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let mut workflow = payload.workflow;
    workflow.id = id.clone();

    if workflow.name.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "workflow name is required"));
    }

    match state.storage.get_workflow(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(api_error(StatusCode::NOT_FOUND, "workflow not found")),
        Err(e) => {
            tracing::error!("Failed to look up workflow {}: {}", id, e);
            return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "storage error"));
        }
    }

    save_and_reload(&state, &workflow).await?;

    tracing::info!("🔥 Hot-reloaded workflow: {} ({})", workflow.id, workflow.name);

    Ok(Json(WorkflowResponse {
        id: workflow.id.clone(),
        message: format!("Workflow '{}' updated successfully", workflow.name),
    }))
}

/// Delete a workflow
///
/// DELETE /api/workflows/{id}
/// Run history of the workflow is kept.
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    state.registry.remove_workflow(&id);

    match state.storage.delete_workflow(&id).await {
        Ok(true) => {
            tracing::info!("Deleted workflow: {}", id);
            Ok(Json(json!({ "message": "Workflow deleted successfully" })))
        }
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to delete workflow: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Check a candidate edge against the stored workflow
///
/// POST /api/workflows/{id}/connections/validate
/// Body: { "source": "...", "target": "...", "target_port": "..." }
/// Returns: { "valid": false, "reason": "..." }
async fn validate_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(candidate): Json<Edge>,
) -> Result<Json<ConnectionCheck>, StatusCode> {
    let workflow = state.registry.get_workflow(&id).ok_or(StatusCode::NOT_FOUND)?;

    let check = match check_connection(&candidate, &workflow.nodes, &workflow.edges) {
        Ok(()) => ConnectionCheck {
            valid: true,
            reason: None,
        },
        Err(reason) => {
            tracing::debug!(
                "🚫 Connection {} → {}:{} rejected: {}",
                candidate.source,
                candidate.target,
                candidate.target_port,
                reason
            );
            ConnectionCheck {
                valid: false,
                reason: Some(reason.to_string()),
            }
        }
    };

    Ok(Json(check))
}
