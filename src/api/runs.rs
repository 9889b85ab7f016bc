/// Run execution and history endpoints
///
/// Starts full workflow runs in the background, runs single nodes for
/// preview, and serves run history to the history viewer.

use crate::api::workflows::AppState;
use crate::history::RunHistoryEntry;
use crate::runtime::dispatcher::{InputError, NodeInputs};
use crate::runtime::engine::SingleNodeResult;
use crate::workflow::types::Node;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Number of runs returned by the history endpoint
const HISTORY_LIMIT: u32 = 20;

/// Request body for single-node execution
#[derive(Debug, Deserialize)]
pub struct ExecuteNodeRequest {
    pub workflow_id: String,
    pub node: Node,
    #[serde(default)]
    pub inputs: NodeInputs,
}

/// Create run routes
pub fn create_run_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/workflows/{id}/runs",
            post(start_run).get(list_runs),
        )
        .route("/api/runs/{run_id}", get(get_run))
        .route("/api/nodes/execute", post(execute_node))
}

/// Start a run of the current workflow snapshot
///
/// POST /api/workflows/{id}/runs
/// Returns 202 with { "run_id": "...", "status": "PENDING" }; execution
/// continues in the background.
async fn start_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let workflow = match state.registry.get_workflow(&id) {
        Some(workflow) => workflow,
        None => {
            tracing::warn!("❌ Run requested for unknown workflow: {}", id);
            return Err(StatusCode::NOT_FOUND);
        }
    };

    let run_id = state.engine.create_run(&workflow.id).await.map_err(|e| {
        tracing::error!("Failed to create run for {}: {}", id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    tracing::info!("📥 Run {} queued for workflow {}", run_id, id);

    let engine = state.engine.clone();
    let background_run_id = run_id.clone();
    tokio::spawn(async move {
        engine.execute_run(&background_run_id, &workflow).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "run_id": run_id, "status": "PENDING" })),
    ))
}

/// Recent runs of a workflow, newest first
///
/// GET /api/workflows/{id}/runs
async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    match state.engine.history().list_runs(&id, HISTORY_LIMIT).await {
        Ok(runs) => Ok(Json(json!({ "runs": runs }))),
        Err(e) => {
            tracing::error!("Failed to list runs of {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// One run with its node executions
///
/// GET /api/runs/{run_id}
async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunHistoryEntry>, StatusCode> {
    let history = state.engine.history();

    let run = match history.get_run(&run_id).await {
        Ok(Some(run)) => run,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to get run {}: {}", run_id, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let executions = history.node_executions(&run_id).await.map_err(|e| {
        tracing::error!("Failed to get node executions of {}: {}", run_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(RunHistoryEntry::new(run, executions)))
}

/// Execute one node with explicit inputs
///
/// POST /api/nodes/execute
/// Body: { "workflow_id": "...", "node": { "id": "...", "type": "llm", ... }, "inputs": { ... } }
/// Returns: { "success": true, "output": { ... } } or { "success": false, "error": "..." }
async fn execute_node(
    State(state): State<AppState>,
    Json(request): Json<ExecuteNodeRequest>,
) -> Result<Json<SingleNodeResult>, (StatusCode, Json<Value>)> {
    match state
        .engine
        .execute_single_node(&request.workflow_id, &request.node, request.inputs)
        .await
    {
        Ok(result) => Ok(Json(result)),
        Err(e) => match e.downcast_ref::<InputError>() {
            Some(input_error) => Err((
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": input_error.to_string() })),
            )),
            None => {
                tracing::error!("❌ Single-node execution of '{}' failed: {}", request.node.id, e);
                Err((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "success": false, "error": "internal error" })),
                ))
            }
        },
    }
}
