/// Run and node-execution record types
///
/// These are the side-channel outputs of the engine: written during a run,
/// read back only by the history API.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle of a run: `PENDING → RUNNING → {COMPLETED, FAILED}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Statuses a run may move to from `self`
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }
}

/// Lifecycle of a node execution: `RUNNING → {SUCCESS, FAILED}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeExecutionStatus {
    Running,
    Success,
    Failed,
}

impl NodeExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeExecutionStatus::Running => "RUNNING",
            NodeExecutionStatus::Success => "SUCCESS",
            NodeExecutionStatus::Failed => "FAILED",
        }
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    /// Full workflow run requested by a user
    Manual,
    /// Preview of one node outside a full run
    SingleNode,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Manual => "MANUAL",
            TriggerType::SingleNode => "SINGLE_NODE",
        }
    }
}

macro_rules! impl_status_text {
    ($ty:ty, $($variant:path => $text:literal),+ $(,)?) => {
        impl FromStr for $ty {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($variant),)+
                    other => Err(anyhow::anyhow!("unknown {} '{}'", stringify!($ty), other)),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_status_text!(RunStatus,
    RunStatus::Pending => "PENDING",
    RunStatus::Running => "RUNNING",
    RunStatus::Completed => "COMPLETED",
    RunStatus::Failed => "FAILED",
);

impl_status_text!(NodeExecutionStatus,
    NodeExecutionStatus::Running => "RUNNING",
    NodeExecutionStatus::Success => "SUCCESS",
    NodeExecutionStatus::Failed => "FAILED",
);

impl_status_text!(TriggerType,
    TriggerType::Manual => "MANUAL",
    TriggerType::SingleNode => "SINGLE_NODE",
);

/// Attempted status change that the lifecycle forbids
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("run '{run_id}' cannot move from {from} to {to}")]
    Run {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("run '{0}' does not exist")]
    UnknownRun(String),

    #[error("node execution '{0}' is already finalized or does not exist")]
    NodeExecutionFinalized(String),
}

/// One persisted run attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    pub trigger_type: TriggerType,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// One persisted attempt to execute one node within a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeExecutionRecord {
    pub id: String,
    pub run_id: String,
    pub node_id: String,
    pub node_kind: String,
    pub status: NodeExecutionStatus,
    pub input_data: Value,
    pub output_data: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// History view of a run for the history viewer
#[derive(Debug, Clone, Serialize)]
pub struct RunHistoryEntry {
    pub id: String,
    pub status: RunStatus,
    pub trigger_type: TriggerType,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Whole seconds, e.g. "12s"; None while running
    pub duration: Option<String>,
    pub nodes: Vec<NodeExecutionView>,
}

/// History view of a node execution
#[derive(Debug, Clone, Serialize)]
pub struct NodeExecutionView {
    pub id: String,
    pub node_id: String,
    pub node_kind: String,
    pub status: NodeExecutionStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    /// Seconds with two decimals, e.g. "1.25s"; None while running
    pub duration: Option<String>,
}

impl RunHistoryEntry {
    pub fn new(run: RunRecord, executions: Vec<NodeExecutionRecord>) -> Self {
        let duration = run.finished_at.map(|end| {
            let secs = (end - run.started_at).num_milliseconds() as f64 / 1000.0;
            format!("{}s", secs.round() as i64)
        });

        Self {
            id: run.id,
            status: run.status,
            trigger_type: run.trigger_type,
            started_at: run.started_at,
            finished_at: run.finished_at,
            duration,
            nodes: executions.into_iter().map(NodeExecutionView::from).collect(),
        }
    }
}

impl From<NodeExecutionRecord> for NodeExecutionView {
    fn from(record: NodeExecutionRecord) -> Self {
        let duration = record.finished_at.map(|end| {
            let secs = (end - record.started_at).num_milliseconds() as f64 / 1000.0;
            format!("{:.2}s", secs)
        });

        Self {
            id: record.id,
            node_id: record.node_id,
            node_kind: record.node_kind,
            status: record.status,
            input: record.input_data,
            output: record.output_data,
            error: record.error,
            duration,
        }
    }
}
