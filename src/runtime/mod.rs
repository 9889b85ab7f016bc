/// Runtime Execution Engine
///
/// This module runs workflows. It handles:
/// - Planning nodes into dependency layers (petgraph, Kahn)
/// - Dispatching passive and active nodes
/// - Submitting jobs to the external worker pool and awaiting them per layer
/// - Recording every run and node execution

// Run controller: layer loop, completion tracking, single-node path
pub mod engine;

// Per-run node outputs
pub mod context;

// Port-based input resolution and job building
pub mod dispatcher;

// Kahn layering over a petgraph DAG
pub mod planner;

// Trigger/resolve contract of the worker pool
pub mod tasks;

// HTTP client for the worker pool
pub mod worker;

// Scripted in-process backend for tests
pub mod testing;

// Re-export main types
pub use context::{ContextError, ExecutionContext, NodeOutput};
pub use dispatcher::{InputError, NodeInputs};
pub use engine::{ExecutionEngine, RunSummary, SingleNodeResult};
pub use planner::{plan_layers, PlanError};
pub use tasks::{TaskBackend, TaskHandle, TaskOutcome, TaskRequest};
pub use worker::HttpTaskBackend;
