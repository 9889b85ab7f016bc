/// Run history
///
/// Persisted run and node-execution records. The engine writes them as a
/// run progresses; the history API reads them back.

pub mod storage;
pub mod types;

pub use storage::RunStorage;
pub use types::{
    NodeExecutionRecord, NodeExecutionStatus, NodeExecutionView, RunHistoryEntry, RunRecord,
    RunStatus, TransitionError, TriggerType,
};
