/// In-process task backend for tests
///
/// Every triggered request is answered from a caller-supplied rule, with
/// optional delays, so runs can be driven deterministically without a worker
/// pool.

use crate::runtime::tasks::{TaskBackend, TaskHandle, TaskOutcome, TaskRequest};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Scripted behaviour for one request
#[derive(Debug, Clone)]
pub struct Script {
    trigger_error: Option<String>,
    trigger_delay: Duration,
    outcome: TaskOutcome,
    delay: Duration,
}

impl Script {
    /// Resolve successfully with `output`
    pub fn complete(output: Value) -> Self {
        Self {
            trigger_error: None,
            trigger_delay: Duration::ZERO,
            outcome: TaskOutcome::Completed(output),
            delay: Duration::ZERO,
        }
    }

    /// Resolve as a failed job with `message`
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            outcome: TaskOutcome::Failed(message.into()),
            ..Self::complete(Value::Null)
        }
    }

    /// Reject the trigger call itself
    pub fn reject_trigger(message: impl Into<String>) -> Self {
        Self {
            trigger_error: Some(message.into()),
            ..Self::complete(Value::Null)
        }
    }

    /// Resolve only after `delay`
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make the trigger call itself take `delay`
    pub fn trigger_after(mut self, delay: Duration) -> Self {
        self.trigger_delay = delay;
        self
    }
}

/// Something the backend observed, in order
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Triggered { handle: String, request: TaskRequest },
    Resolved { handle: String },
}

type Rule = dyn Fn(&TaskRequest) -> Script + Send + Sync;

pub struct ScriptedBackend {
    rule: Box<Rule>,
    next_id: AtomicUsize,
    scripts: Mutex<HashMap<String, Script>>,
    events: Mutex<Vec<BackendEvent>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedBackend {
    pub fn new(rule: impl Fn(&TaskRequest) -> Script + Send + Sync + 'static) -> Self {
        Self {
            rule: Box::new(rule),
            next_id: AtomicUsize::new(1),
            scripts: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Every trigger and resolution so far
    pub fn events(&self) -> Vec<BackendEvent> {
        lock(&self.events).clone()
    }

    /// Requests that reached the worker, in trigger order
    pub fn triggered(&self) -> Vec<TaskRequest> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                BackendEvent::Triggered { request, .. } => Some(request.clone()),
                BackendEvent::Resolved { .. } => None,
            })
            .collect()
    }
}

impl TaskBackend for ScriptedBackend {
    fn trigger<'a>(&'a self, request: &'a TaskRequest) -> BoxFuture<'a, anyhow::Result<TaskHandle>> {
        Box::pin(async move {
            let script = (self.rule)(request);

            if !script.trigger_delay.is_zero() {
                tokio::time::sleep(script.trigger_delay).await;
            }
            if let Some(message) = script.trigger_error {
                return Err(anyhow::anyhow!(message));
            }

            let id = format!("run_{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            lock(&self.events).push(BackendEvent::Triggered {
                handle: id.clone(),
                request: request.clone(),
            });
            lock(&self.scripts).insert(id.clone(), script);

            Ok(TaskHandle {
                id,
                task_id: request.task_id(),
            })
        })
    }

    fn wait<'a>(&'a self, handle: &'a TaskHandle) -> BoxFuture<'a, TaskOutcome> {
        Box::pin(async move {
            let script = lock(&self.scripts).remove(&handle.id);
            let Some(script) = script else {
                return TaskOutcome::Failed(format!("unknown run {}", handle.id));
            };

            if !script.delay.is_zero() {
                tokio::time::sleep(script.delay).await;
            }

            lock(&self.events).push(BackendEvent::Resolved {
                handle: handle.id.clone(),
            });
            script.outcome
        })
    }
}
