/// Layered DAG execution engine
///
/// Plans a workflow into dependency layers and runs them one at a time.
/// Within a layer, passive nodes write their values directly and every active
/// node's job is submitted before any is awaited; the layer then waits for
/// all of its jobs (a barrier, not a race). One failed node flags the run
/// failed without cancelling its siblings, and no later layer is started.

use crate::history::{RunStatus, RunStorage, TriggerType};
use crate::runtime::context::{ExecutionContext, NodeOutput};
use crate::runtime::dispatcher::{prepare, prepare_with, Dispatch, InputError, NodeInputs};
use crate::runtime::planner::{layer_ids, plan_layers};
use crate::runtime::tasks::{TaskBackend, TaskHandle, TaskOutcome, TaskRequest};
use crate::workflow::types::{Node, Workflow};
use anyhow::Result;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc, time::Duration};

/// Final state of one run, returned to the invoker instead of an error
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    /// Planned layers as node ids
    pub layers: Vec<Vec<String>>,
    /// Context at the end of the run
    pub outputs: HashMap<String, NodeOutput>,
    /// Run-level error (cycle, storage failure); node errors live in their records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of single-node execution
#[derive(Debug, Clone, Serialize)]
pub struct SingleNodeResult {
    pub run_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A job that was triggered and now awaits resolution
struct Submitted<'a> {
    node: &'a Node,
    execution_id: String,
    request: TaskRequest,
    handle: TaskHandle,
}

/// Execution engine driving runs against a [`TaskBackend`]
///
/// Holds no per-run state: each run gets its own [`ExecutionContext`], so
/// concurrent runs never see each other's outputs.
#[derive(Clone)]
pub struct ExecutionEngine {
    backend: Arc<dyn TaskBackend>,
    history: RunStorage,
    /// Bound on a single trigger call; exceeding it fails the node
    trigger_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(backend: Arc<dyn TaskBackend>, history: RunStorage, trigger_timeout: Duration) -> Self {
        Self {
            backend,
            history,
            trigger_timeout,
        }
    }

    pub fn history(&self) -> &RunStorage {
        &self.history
    }

    /// Create the PENDING record for a manually requested run
    pub async fn create_run(&self, workflow_id: &str) -> Result<String> {
        let run = self
            .history
            .create_run(workflow_id, TriggerType::Manual, RunStatus::Pending)
            .await?;
        Ok(run.id)
    }

    /// Create a run and execute it to completion
    pub async fn run_workflow(&self, workflow: &Workflow) -> Result<RunSummary> {
        let run_id = self.create_run(&workflow.id).await?;
        Ok(self.execute_run(&run_id, workflow).await)
    }

    /// Execute a PENDING run against a workflow snapshot
    ///
    /// Never fails: node errors are recorded on their executions and
    /// run-level errors end the run FAILED, both reported in the summary.
    pub async fn execute_run(&self, run_id: &str, workflow: &Workflow) -> RunSummary {
        let run_start_time = std::time::Instant::now();

        tracing::info!(
            "🚀 Starting run {} of workflow '{}' ({} nodes, {} edges)",
            run_id,
            workflow.id,
            workflow.nodes.len(),
            workflow.edges.len()
        );

        let mut summary = RunSummary {
            run_id: run_id.to_string(),
            status: RunStatus::Running,
            layers: Vec::new(),
            outputs: HashMap::new(),
            error: None,
        };

        if let Err(e) = self.drive(run_id, workflow, &mut summary).await {
            tracing::error!("❌ Run {} aborted: {}", run_id, e);
            let reason = format!("Run aborted: {}", e);
            match self.history.fail_open_node_executions(run_id, &reason).await {
                Ok(0) => {}
                Ok(closed) => tracing::warn!("🧹 Closed {} open node executions of run {}", closed, run_id),
                Err(sweep_err) => {
                    tracing::error!("❌ Could not close node executions of run {}: {}", run_id, sweep_err)
                }
            }
            if let Err(finish_err) = self.history.finish_run(run_id, RunStatus::Failed).await {
                tracing::error!("❌ Could not mark run {} failed: {}", run_id, finish_err);
            }
            summary.status = RunStatus::Failed;
            summary.error = Some(e.to_string());
        }

        match summary.status {
            RunStatus::Completed => tracing::info!(
                "🎉 Run {} completed in {:?}",
                run_id,
                run_start_time.elapsed()
            ),
            _ => tracing::warn!(
                "💥 Run {} ended {} after {:?}",
                run_id,
                summary.status,
                run_start_time.elapsed()
            ),
        }

        summary
    }

    async fn drive(&self, run_id: &str, workflow: &Workflow, summary: &mut RunSummary) -> Result<()> {
        self.history.start_run(run_id).await?;

        let layers = match plan_layers(&workflow.nodes, &workflow.edges) {
            Ok(layers) => layers,
            Err(e) => {
                self.history.finish_run(run_id, RunStatus::Failed).await?;
                summary.status = RunStatus::Failed;
                summary.error = Some(e.to_string());
                return Ok(());
            }
        };
        summary.layers = layer_ids(&layers);
        tracing::debug!("📋 Execution layers: {:?}", summary.layers);

        let mut ctx = ExecutionContext::new();
        let mut failed = false;

        for (step, layer) in layers.iter().enumerate() {
            tracing::info!(
                "📍 Layer {}/{}: {} nodes",
                step + 1,
                layers.len(),
                layer.len()
            );

            let mut jobs = Vec::new();
            for &node in layer {
                match prepare(node, &workflow.edges, &ctx) {
                    Dispatch::Passive(Some(output)) => ctx.record(&node.id, output)?,
                    Dispatch::Passive(None) => {
                        tracing::debug!("⏭️ Source node '{}' has no value", node.id);
                    }
                    Dispatch::Active { request, snapshot } => jobs.push((node, request, snapshot)),
                    Dispatch::Rejected { error, snapshot } => {
                        self.record_local_failure(run_id, node, &snapshot, &error)
                            .await?;
                        failed = true;
                    }
                }
            }

            if !jobs.is_empty() {
                tracing::info!("🚀 Triggering {} tasks in parallel", jobs.len());
            }
            let submissions = join_all(
                jobs.into_iter()
                    .map(|(node, request, snapshot)| self.submit(run_id, node, request, snapshot)),
            )
            .await;

            // storage errors abort the run, but only after every triggered job is settled
            let mut pending = Vec::with_capacity(submissions.len());
            let mut submit_error = None;
            for submission in submissions {
                match submission {
                    Ok(Ok(job)) => pending.push(job),
                    Ok(Err(_)) => failed = true,
                    Err(e) => {
                        failed = true;
                        submit_error.get_or_insert(e);
                    }
                }
            }

            let settled = self.await_layer(&pending, &mut ctx).await;
            if let Some(e) = submit_error {
                return Err(e);
            }
            if settled? {
                failed = true;
            }

            if failed {
                tracing::warn!(
                    "⏸️ Stopping run {} after layer {}: a node failed",
                    run_id,
                    step + 1
                );
                break;
            }
        }

        let status = if failed {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        self.history.finish_run(run_id, status).await?;

        summary.status = status;
        summary.outputs = ctx.into_outputs();
        Ok(())
    }

    /// Record a node whose inputs could not be resolved as failed
    async fn record_local_failure(
        &self,
        run_id: &str,
        node: &Node,
        snapshot: &Value,
        error: &InputError,
    ) -> Result<()> {
        tracing::error!("❌ Node '{}' cannot run: {}", node.id, error);
        let record = self
            .history
            .begin_node_execution(run_id, &node.id, node.kind.name(), snapshot)
            .await?;
        self.history
            .fail_node_execution(&record.id, &error.to_string())
            .await
    }

    /// Create the RUNNING record and trigger the job
    ///
    /// The inner `Err` carries the trigger error, already recorded on the
    /// node execution; the outer one is a storage failure.
    async fn submit<'a>(
        &self,
        run_id: &str,
        node: &'a Node,
        request: TaskRequest,
        snapshot: Value,
    ) -> Result<std::result::Result<Submitted<'a>, String>> {
        let record = self
            .history
            .begin_node_execution(run_id, &node.id, node.kind.name(), &snapshot)
            .await?;

        let triggered = tokio::time::timeout(self.trigger_timeout, self.backend.trigger(&request)).await;

        let error = match triggered {
            Ok(Ok(handle)) => {
                tracing::debug!(
                    "🎫 Node '{}' submitted as {} ({})",
                    node.id,
                    handle.id,
                    handle.task_id
                );
                return Ok(Ok(Submitted {
                    node,
                    execution_id: record.id,
                    request,
                    handle,
                }));
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("Trigger timed out after {:?}", self.trigger_timeout),
        };

        tracing::error!("❌ Node '{}' trigger failed: {}", node.id, error);
        self.history
            .fail_node_execution(&record.id, &error)
            .await?;
        Ok(Err(error))
    }

    /// Wait for every submitted job, then record results in submission order
    ///
    /// Every job is finalized even when recording an earlier one fails; the
    /// first such error is returned once the whole layer is settled.
    /// Otherwise returns true if any job failed.
    async fn await_layer(&self, pending: &[Submitted<'_>], ctx: &mut ExecutionContext) -> Result<bool> {
        let outcomes = join_all(pending.iter().map(|job| self.backend.wait(&job.handle))).await;

        let mut failed = false;
        let mut first_error = None;
        for (job, outcome) in pending.iter().zip(outcomes) {
            let recorded = match self.finalize(job, outcome).await {
                Ok(Ok(output)) => ctx.record(&job.node.id, output).map_err(anyhow::Error::from),
                Ok(Err(_)) => {
                    failed = true;
                    Ok(())
                }
                Err(e) => Err(e),
            };

            if let Err(e) = recorded {
                tracing::error!("❌ Could not record result of node '{}': {}", job.node.id, e);
                failed = true;
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(failed),
        }
    }

    /// Persist a job's terminal outcome on its node execution
    async fn finalize(
        &self,
        job: &Submitted<'_>,
        outcome: TaskOutcome,
    ) -> Result<std::result::Result<NodeOutput, String>> {
        let parsed = match outcome {
            TaskOutcome::Completed(value) => job.request.parse_output(&value),
            TaskOutcome::Failed(message) => Err(message),
        };

        match parsed {
            Ok(output) => {
                self.history
                    .complete_node_execution(&job.execution_id, &output.to_record())
                    .await?;
                tracing::info!("✅ Node '{}' completed", job.node.id);
                Ok(Ok(output))
            }
            Err(message) => {
                tracing::error!("❌ Node '{}' failed: {}", job.node.id, message);
                self.history
                    .fail_node_execution(&job.execution_id, &message)
                    .await?;
                Ok(Err(message))
            }
        }
    }

    /// Run one active node outside a full run, with explicit inputs
    ///
    /// Creates a SINGLE_NODE run (already RUNNING) holding one node execution.
    /// Passive nodes are refused before any record is written.
    pub async fn execute_single_node(
        &self,
        workflow_id: &str,
        node: &Node,
        inputs: NodeInputs,
    ) -> Result<SingleNodeResult> {
        if node.kind.is_passive() {
            return Err(InputError::NotExecutable(node.kind.name()).into());
        }

        tracing::info!("🔬 Executing single node '{}' ({})", node.id, node.kind.name());

        let run = self
            .history
            .create_run(workflow_id, TriggerType::SingleNode, RunStatus::Running)
            .await?;

        let result = match prepare_with(node, inputs.into()) {
            Dispatch::Active { request, snapshot } => {
                match self.submit(&run.id, node, request, snapshot).await? {
                    Ok(job) => {
                        let outcome = self.backend.wait(&job.handle).await;
                        self.finalize(&job, outcome).await?.map(|_| ())
                    }
                    Err(error) => Err(error),
                }
            }
            Dispatch::Rejected { error, snapshot } => {
                self.record_local_failure(&run.id, node, &snapshot, &error)
                    .await?;
                Err(error.to_string())
            }
            Dispatch::Passive(_) => Err(InputError::NotExecutable(node.kind.name()).to_string()),
        };

        let status = if result.is_ok() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        self.history.finish_run(&run.id, status).await?;

        let output = if result.is_ok() {
            self.history
                .node_executions(&run.id)
                .await?
                .into_iter()
                .next()
                .and_then(|record| record.output_data)
        } else {
            None
        };

        Ok(SingleNodeResult {
            run_id: run.id,
            success: result.is_ok(),
            output,
            error: result.err(),
        })
    }
}
