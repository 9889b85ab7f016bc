/// SQLite persistence for run and node-execution records
///
/// Every status change is a conditional UPDATE guarded by the expected
/// current status, so a terminal record can never be overwritten.

use crate::history::types::{
    NodeExecutionRecord, NodeExecutionStatus, RunHistoryEntry, RunRecord, RunStatus,
    TransitionError, TriggerType,
};
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, sqlite::SqliteRow, Row};

/// Run history storage manager
#[derive(Debug, Clone)]
pub struct RunStorage {
    /// Shared with `WorkflowStorage`; schema created by `database::init_schema`
    pool: SqlitePool,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(|e| anyhow::anyhow!("Invalid timestamp '{}': {}", raw, e))?
        .with_timezone(&Utc))
}

fn parse_optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_timestamp).transpose()
}

fn run_from_row(row: &SqliteRow) -> Result<RunRecord> {
    Ok(RunRecord {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        status: row.get::<String, _>("status").parse()?,
        trigger_type: row.get::<String, _>("trigger_type").parse()?,
        started_at: parse_timestamp(&row.get::<String, _>("started_at"))?,
        finished_at: parse_optional_timestamp(row.get("finished_at"))?,
    })
}

fn execution_from_row(row: &SqliteRow) -> Result<NodeExecutionRecord> {
    let input_json: String = row.get("input_data");
    let output_json: Option<String> = row.get("output_data");

    Ok(NodeExecutionRecord {
        id: row.get("id"),
        run_id: row.get("run_id"),
        node_id: row.get("node_id"),
        node_kind: row.get("node_kind"),
        status: row.get::<String, _>("status").parse()?,
        input_data: serde_json::from_str(&input_json)?,
        output_data: output_json
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()?,
        error: row.get("error"),
        started_at: parse_timestamp(&row.get::<String, _>("started_at"))?,
        finished_at: parse_optional_timestamp(row.get("finished_at"))?,
    })
}

impl RunStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a run record in the given initial status
    ///
    /// Full runs start PENDING; single-node previews are created RUNNING.
    pub async fn create_run(
        &self,
        workflow_id: &str,
        trigger_type: TriggerType,
        status: RunStatus,
    ) -> Result<RunRecord> {
        let record = RunRecord {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            status,
            trigger_type,
            started_at: Utc::now(),
            finished_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO workflow_runs (id, workflow_id, status, trigger_type, started_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.workflow_id)
        .bind(record.status.as_str())
        .bind(record.trigger_type.as_str())
        .bind(timestamp(record.started_at))
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "📝 Created {} run {} for workflow '{}' ({})",
            record.trigger_type,
            record.id,
            workflow_id,
            record.status
        );

        Ok(record)
    }

    /// PENDING → RUNNING, stamping `started_at` with the actual start
    pub async fn start_run(&self, run_id: &str) -> Result<()> {
        self.transition_run(run_id, RunStatus::Pending, RunStatus::Running)
            .await
    }

    /// RUNNING → COMPLETED or FAILED, stamping `finished_at`
    pub async fn finish_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        self.transition_run(run_id, RunStatus::Running, status)
            .await
    }

    async fn transition_run(&self, run_id: &str, from: RunStatus, to: RunStatus) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(TransitionError::Run {
                run_id: run_id.to_string(),
                from,
                to,
            }
            .into());
        }

        let now = timestamp(Utc::now());
        let started_at = (to == RunStatus::Running).then(|| now.clone());
        let finished_at = to.is_terminal().then_some(now);

        let result = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = ?,
                started_at = COALESCE(?, started_at),
                finished_at = COALESCE(?, finished_at)
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(started_at)
        .bind(finished_at)
        .bind(run_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get_run(run_id).await?;
            return Err(match current {
                Some(run) => TransitionError::Run {
                    run_id: run_id.to_string(),
                    from: run.status,
                    to,
                }
                .into(),
                None => TransitionError::UnknownRun(run_id.to_string()).into(),
            });
        }

        tracing::debug!("🔁 Run {}: {} → {}", run_id, from, to);
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let row = sqlx::query(
            "SELECT id, workflow_id, status, trigger_type, started_at, finished_at FROM workflow_runs WHERE id = ?",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(run_from_row).transpose()
    }

    /// Insert a RUNNING node-execution record with its input snapshot
    pub async fn begin_node_execution(
        &self,
        run_id: &str,
        node_id: &str,
        node_kind: &str,
        input_data: &Value,
    ) -> Result<NodeExecutionRecord> {
        let record = NodeExecutionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            node_kind: node_kind.to_string(),
            status: NodeExecutionStatus::Running,
            input_data: input_data.clone(),
            output_data: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO node_executions (id, run_id, node_id, node_kind, status, input_data, started_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.run_id)
        .bind(&record.node_id)
        .bind(&record.node_kind)
        .bind(record.status.as_str())
        .bind(serde_json::to_string(&record.input_data)?)
        .bind(timestamp(record.started_at))
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    /// RUNNING → SUCCESS with the produced output
    pub async fn complete_node_execution(&self, execution_id: &str, output: &Value) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE node_executions
            SET status = ?, output_data = ?, finished_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(NodeExecutionStatus::Success.as_str())
        .bind(serde_json::to_string(output)?)
        .bind(timestamp(Utc::now()))
        .bind(execution_id)
        .bind(NodeExecutionStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TransitionError::NodeExecutionFinalized(execution_id.to_string()).into());
        }
        Ok(())
    }

    /// RUNNING → FAILED with an error message
    pub async fn fail_node_execution(&self, execution_id: &str, error: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE node_executions
            SET status = ?, error = ?, finished_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(NodeExecutionStatus::Failed.as_str())
        .bind(error)
        .bind(timestamp(Utc::now()))
        .bind(execution_id)
        .bind(NodeExecutionStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TransitionError::NodeExecutionFinalized(execution_id.to_string()).into());
        }
        Ok(())
    }

    /// Fail every node execution of a run still RUNNING
    ///
    /// Used when a run aborts, so no record is left open. Returns how many
    /// records were closed.
    pub async fn fail_open_node_executions(&self, run_id: &str, error: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE node_executions
            SET status = ?, error = ?, finished_at = ?
            WHERE run_id = ? AND status = ?
            "#,
        )
        .bind(NodeExecutionStatus::Failed.as_str())
        .bind(error)
        .bind(timestamp(Utc::now()))
        .bind(run_id)
        .bind(NodeExecutionStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Node executions of a run in start order
    pub async fn node_executions(&self, run_id: &str) -> Result<Vec<NodeExecutionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, run_id, node_id, node_kind, status, input_data, output_data, error, started_at, finished_at
            FROM node_executions
            WHERE run_id = ?
            ORDER BY started_at ASC, rowid ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(execution_from_row).collect()
    }

    /// Most recent runs of a workflow, newest first, with their node executions
    pub async fn list_runs(&self, workflow_id: &str, limit: u32) -> Result<Vec<RunHistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, status, trigger_type, started_at, finished_at
            FROM workflow_runs
            WHERE workflow_id = ?
            ORDER BY started_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(workflow_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let run = run_from_row(row)?;
            let executions = self.node_executions(&run.id).await?;
            entries.push(RunHistoryEntry::new(run, executions));
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_memory_pool;
    use serde_json::json;

    async fn storage() -> RunStorage {
        RunStorage::new(open_memory_pool().await.unwrap())
    }

    #[tokio::test]
    async fn run_lifecycle_is_enforced() {
        let storage = storage().await;
        let run = storage
            .create_run("wf", TriggerType::Manual, RunStatus::Pending)
            .await
            .unwrap();

        // cannot finish before starting
        assert!(storage.finish_run(&run.id, RunStatus::Completed).await.is_err());

        storage.start_run(&run.id).await.unwrap();
        assert!(storage.start_run(&run.id).await.is_err());

        storage.finish_run(&run.id, RunStatus::Failed).await.unwrap();
        let err = storage
            .finish_run(&run.id, RunStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TransitionError>(),
            Some(TransitionError::Run { from: RunStatus::Failed, .. })
        ));

        let stored = storage.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn start_run_stamps_actual_start_time() {
        let storage = storage().await;
        let run = storage
            .create_run("wf", TriggerType::Manual, RunStatus::Pending)
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        storage.start_run(&run.id).await.unwrap();

        let started = storage.get_run(&run.id).await.unwrap().unwrap();
        assert!(started.started_at > run.started_at);
        assert!(started.finished_at.is_none());
    }

    #[tokio::test]
    async fn open_node_executions_are_failed_on_abort() {
        let storage = storage().await;
        let run = storage
            .create_run("wf", TriggerType::Manual, RunStatus::Running)
            .await
            .unwrap();
        let done = storage
            .begin_node_execution(&run.id, "a", "llm", &json!({}))
            .await
            .unwrap();
        storage
            .complete_node_execution(&done.id, &json!({"text": "ok"}))
            .await
            .unwrap();
        storage
            .begin_node_execution(&run.id, "b", "crop", &json!({}))
            .await
            .unwrap();

        let closed = storage
            .fail_open_node_executions(&run.id, "Run aborted")
            .await
            .unwrap();
        assert_eq!(closed, 1);

        let records = storage.node_executions(&run.id).await.unwrap();
        assert_eq!(records[0].status, NodeExecutionStatus::Success);
        assert_eq!(records[1].status, NodeExecutionStatus::Failed);
        assert_eq!(records[1].error.as_deref(), Some("Run aborted"));
        assert!(records[1].finished_at.is_some());
    }

    #[tokio::test]
    async fn finish_run_rejects_non_terminal_status() {
        let storage = storage().await;
        let run = storage
            .create_run("wf", TriggerType::SingleNode, RunStatus::Running)
            .await
            .unwrap();
        assert!(storage.finish_run(&run.id, RunStatus::Pending).await.is_err());
        assert!(storage.finish_run(&run.id, RunStatus::Completed).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_run_is_reported() {
        let storage = storage().await;
        let err = storage.start_run("nope").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<TransitionError>(),
            Some(&TransitionError::UnknownRun("nope".into()))
        );
    }

    #[tokio::test]
    async fn node_execution_is_finalized_once() {
        let storage = storage().await;
        let run = storage
            .create_run("wf", TriggerType::Manual, RunStatus::Running)
            .await
            .unwrap();
        let exec = storage
            .begin_node_execution(&run.id, "llm-1", "llm", &json!({"prompt": "hi"}))
            .await
            .unwrap();

        storage
            .complete_node_execution(&exec.id, &json!({"text": "hello"}))
            .await
            .unwrap();
        assert!(storage.fail_node_execution(&exec.id, "late").await.is_err());

        let records = storage.node_executions(&run.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, NodeExecutionStatus::Success);
        assert_eq!(records[0].output_data, Some(json!({"text": "hello"})));
        assert_eq!(records[0].input_data, json!({"prompt": "hi"}));
        assert!(records[0].error.is_none());
    }

    #[tokio::test]
    async fn list_runs_is_newest_first_and_limited() {
        let storage = storage().await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let run = storage
                .create_run("wf", TriggerType::Manual, RunStatus::Pending)
                .await
                .unwrap();
            ids.push(run.id);
        }
        storage
            .create_run("other", TriggerType::Manual, RunStatus::Pending)
            .await
            .unwrap();

        let failed = storage
            .begin_node_execution(&ids[2], "crop-1", "crop", &json!({}))
            .await
            .unwrap();
        storage.fail_node_execution(&failed.id, "No input image").await.unwrap();

        let listed = storage.list_runs("wf", 2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, ids[2]);
        assert_eq!(listed[1].id, ids[1]);
        assert_eq!(listed[0].nodes.len(), 1);
        assert_eq!(listed[0].nodes[0].error.as_deref(), Some("No input image"));
        assert!(listed[0].duration.is_none());
    }
}
