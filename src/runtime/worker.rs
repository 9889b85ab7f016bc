/// HTTP client for the external task worker pool
///
/// Triggers jobs through the worker's REST API and polls their run status
/// until a terminal state is reached.

use crate::config::WorkerConfig;
use crate::runtime::tasks::{TaskBackend, TaskHandle, TaskOutcome, TaskRequest};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Run statuses after which a job will not change again
const TERMINAL_STATUSES: &[&str] = &[
    "COMPLETED",
    "FAILED",
    "CRASHED",
    "TIMED_OUT",
    "CANCELED",
    "SYSTEM_FAILURE",
    "EXPIRED",
];

#[derive(Serialize)]
struct TriggerRequest<'a> {
    payload: &'a Value,
}

#[derive(Deserialize)]
struct TriggerResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunStatusResponse {
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// [`TaskBackend`] talking to the worker pool over HTTP
#[derive(Debug, Clone)]
pub struct HttpTaskBackend {
    client: reqwest::Client,
    base_url: String,
    secret_key: Option<String>,
    poll_interval: Duration,
    max_poll_failures: u32,
}

impl HttpTaskBackend {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            poll_interval: config.poll_interval(),
            max_poll_failures: config.max_poll_failures.max(1),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.secret_key {
            Some(ref key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn fetch_status(&self, run_id: &str) -> anyhow::Result<RunStatusResponse> {
        let url = format!("{}/api/v3/runs/{}", self.base_url, run_id);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Status request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Worker API error {}: {}", status, body));
        }

        response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse run status: {}", e))
    }
}

/// Convert a terminal run status into an outcome
fn outcome_from_status(run: RunStatusResponse) -> TaskOutcome {
    if run.status == "COMPLETED" {
        return TaskOutcome::Completed(run.output.unwrap_or(Value::Null));
    }

    let message = match run.error {
        Some(Value::String(message)) => message,
        Some(error) => error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        None => format!("Task failed with status {}", run.status),
    };
    TaskOutcome::Failed(message)
}

impl TaskBackend for HttpTaskBackend {
    fn trigger<'a>(&'a self, request: &'a TaskRequest) -> BoxFuture<'a, anyhow::Result<TaskHandle>> {
        Box::pin(async move {
            let task_id = request.task_id();
            let url = format!("{}/api/v1/tasks/{}/trigger", self.base_url, task_id);
            let payload = request.payload();

            tracing::debug!("📤 Triggering task '{}'", task_id);

            let response = self
                .authorize(self.client.post(&url))
                .json(&TriggerRequest { payload: &payload })
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Trigger request failed: {}", e))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(anyhow::anyhow!("Worker API error {}: {}", status, body));
            }

            let body: TriggerResponse = response
                .json()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to parse trigger response: {}", e))?;

            tracing::debug!("🎫 Task '{}' queued as run {}", task_id, body.id);

            Ok(TaskHandle { id: body.id, task_id })
        })
    }

    fn wait<'a>(&'a self, handle: &'a TaskHandle) -> BoxFuture<'a, TaskOutcome> {
        Box::pin(async move {
            let mut failures = 0u32;

            loop {
                match self.fetch_status(&handle.id).await {
                    Ok(run) if TERMINAL_STATUSES.contains(&run.status.as_str()) => {
                        tracing::debug!("🏁 Run {} finished: {}", handle.id, run.status);
                        return outcome_from_status(run);
                    }
                    Ok(_) => failures = 0,
                    Err(e) => {
                        failures += 1;
                        tracing::warn!(
                            "⚠️ Polling run {} failed ({}/{}): {}",
                            handle.id,
                            failures,
                            self.max_poll_failures,
                            e
                        );
                        if failures >= self.max_poll_failures {
                            return TaskOutcome::Failed(format!(
                                "Lost contact with worker while waiting for run {}: {}",
                                handle.id, e
                            ));
                        }
                    }
                }

                tokio::time::sleep(self.poll_interval).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::tasks::{CropImagePayload, TaskRequest};
    use axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    #[derive(Default)]
    struct MockWorker {
        polls: AtomicU32,
    }

    async fn trigger(
        Path(task): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Result<Json<Value>, StatusCode> {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer s3cret") {
            return Err(StatusCode::UNAUTHORIZED);
        }
        if task != "crop-image" || body["payload"]["imageUrl"] != "a.png" {
            return Err(StatusCode::BAD_REQUEST);
        }
        Ok(Json(json!({ "id": "run_1" })))
    }

    async fn status(
        Path(id): Path<String>,
        State(worker): State<Arc<MockWorker>>,
    ) -> Result<Json<Value>, StatusCode> {
        match id.as_str() {
            "run_1" => {
                let polls = worker.polls.fetch_add(1, Ordering::SeqCst);
                if polls < 2 {
                    Ok(Json(json!({ "status": "EXECUTING" })))
                } else {
                    Ok(Json(json!({ "status": "COMPLETED", "output": { "url": "cropped.png" } })))
                }
            }
            "run_crashed" => Ok(Json(json!({ "status": "CRASHED", "error": { "message": "ffmpeg died" } }))),
            _ => Err(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    async fn spawn_worker() -> (String, Arc<MockWorker>) {
        let worker = Arc::new(MockWorker::default());
        let app = Router::new()
            .route("/api/v1/tasks/{task}/trigger", post(trigger))
            .route("/api/v3/runs/{id}", get(status))
            .with_state(worker.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/", addr), worker)
    }

    fn backend(base_url: String) -> HttpTaskBackend {
        HttpTaskBackend::new(&WorkerConfig {
            base_url,
            secret_key: Some("s3cret".into()),
            trigger_timeout_ms: 1_000,
            poll_interval_ms: 10,
            max_poll_failures: 3,
        })
    }

    fn crop_request() -> TaskRequest {
        TaskRequest::CropImage(CropImagePayload {
            image_url: "a.png".into(),
            x_percent: 0.0,
            y_percent: 0.0,
            width_percent: 100.0,
            height_percent: 100.0,
        })
    }

    #[tokio::test]
    async fn triggers_and_polls_until_completed() {
        let (url, worker) = spawn_worker().await;
        let backend = backend(url);

        let handle = backend.trigger(&crop_request()).await.unwrap();
        assert_eq!(handle, TaskHandle { id: "run_1".into(), task_id: "crop-image" });

        let outcome = backend.wait(&handle).await;
        assert_eq!(outcome, TaskOutcome::Completed(json!({ "url": "cropped.png" })));
        assert_eq!(worker.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn crashed_run_reports_error_message() {
        let (url, _) = spawn_worker().await;
        let handle = TaskHandle { id: "run_crashed".into(), task_id: "crop-image" };
        assert_eq!(
            backend(url).wait(&handle).await,
            TaskOutcome::Failed("ffmpeg died".into())
        );
    }

    #[tokio::test]
    async fn repeated_poll_errors_give_up() {
        let (url, _) = spawn_worker().await;
        let handle = TaskHandle { id: "run_missing".into(), task_id: "crop-image" };
        match backend(url).wait(&handle).await {
            TaskOutcome::Failed(message) => assert!(message.contains("run_missing"), "{message}"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn trigger_rejection_is_an_error() {
        let (url, _) = spawn_worker().await;
        let mut backend = backend(url);
        backend.secret_key = None;
        let err = backend.trigger(&crop_request()).await.unwrap_err();
        assert!(err.to_string().contains("401"), "{err}");
    }

    #[test]
    fn failed_status_without_error_uses_status_name() {
        let outcome = outcome_from_status(RunStatusResponse {
            status: "TIMED_OUT".into(),
            output: None,
            error: None,
        });
        assert_eq!(outcome, TaskOutcome::Failed("Task failed with status TIMED_OUT".into()));
    }
}
