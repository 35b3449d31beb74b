// src/runtime/task_executor.rs
//! Concurrent task execution
//!
//! A batch is fanned out onto the dispatcher and gathered back into slots
//! indexed by input position, so `results[i]` always answers `tasks[i]`
//! whatever order the workers finish in.
//!
//! ```text
//! tasks[0] tasks[1] tasks[2]
//!    │        │        │      submit in order
//!    ▼        ▼        ▼
//! ┌──────── Dispatcher (max N running) ────────┐
//! └────┬────────┬────────┬──────────────────────┘
//!      │(i, r)  │        │    crossbeam reply channel
//!      ▼        ▼        ▼
//! slots[0]  slots[1]  slots[2]
//! ```
//!
//! A single task with a timeout is abandoned, never killed: its
//! cancellation token is tripped so a task still queued is skipped and a
//! running handler can notice, and its reply is dropped unread.

use crate::backend::{global_resolver, Backend, BackendResolver, Component};
use crate::runtime::dispatcher::{build_dispatcher, Dispatcher, DispatcherStats};
use crate::runtime::panic_message;
use crate::utils::errors::{EngineError, ErrorKind, Result};
use crossbeam_channel::RecvTimeoutError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use ulid::Ulid;

/// Opaque task payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub name: String,

    /// Informational only; execution order is submission order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,

    /// Every other field of the payload
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TaskDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: None,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    pub fn description(&self) -> Option<&str> {
        self.fields.get("description").and_then(Value::as_str)
    }

    /// Build a descriptor from a JSON payload. Strings become bare task
    /// names; objects need a string `name`.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::String(name) => Ok(Self::new(name)),
            Value::Object(_) => serde_json::from_value(value)
                .map_err(|e| EngineError::execution("task descriptor", e)),
            other => Err(EngineError::execution(
                "task descriptor",
                format!("expected a string or object, got {}", other),
            )),
        }
    }
}

impl From<&str> for TaskDescriptor {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TaskDescriptor {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Terminal state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Completed,
    Failed,
    TimedOut,
}

/// Outcome of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskResult {
    Completed {
        task: String,
        output: Value,
    },
    Failed {
        task: String,
        kind: ErrorKind,
        message: String,
    },
    TimedOut {
        task: String,
        timeout_ms: u64,
    },
}

impl TaskResult {
    fn failed(task: &str, error: &EngineError) -> Self {
        TaskResult::Failed {
            task: task.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    pub fn state(&self) -> TaskState {
        match self {
            TaskResult::Completed { .. } => TaskState::Completed,
            TaskResult::Failed { .. } => TaskState::Failed,
            TaskResult::TimedOut { .. } => TaskState::TimedOut,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state() == TaskState::Completed
    }

    pub fn task_name(&self) -> &str {
        match self {
            TaskResult::Completed { task, .. }
            | TaskResult::Failed { task, .. }
            | TaskResult::TimedOut { task, .. } => task,
        }
    }

    /// Success payload
    pub fn output(&self) -> Option<&Value> {
        match self {
            TaskResult::Completed { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Error kind of a failed or timed-out task
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            TaskResult::Completed { .. } => None,
            TaskResult::Failed { kind, .. } => Some(*kind),
            TaskResult::TimedOut { .. } => Some(ErrorKind::TimedOut),
        }
    }
}

/// Per-task view handed to a handler
#[derive(Debug, Clone)]
pub struct TaskContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl TaskContext {
    fn new(deadline: Option<Instant>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline,
        }
    }

    /// True once the caller has stopped waiting for this task
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the caller gives up, if bounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// Work performed for one task descriptor
pub trait TaskHandler: Send + Sync + 'static {
    fn run(&self, task: &TaskDescriptor, ctx: &TaskContext) -> Result<Value>;
}

impl<F> TaskHandler for F
where
    F: Fn(&TaskDescriptor, &TaskContext) -> Result<Value> + Send + Sync + 'static,
{
    fn run(&self, task: &TaskDescriptor, ctx: &TaskContext) -> Result<Value> {
        self(task, ctx)
    }
}

/// Handler used when none is supplied: reports the task as completed
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTaskHandler;

impl TaskHandler for DefaultTaskHandler {
    fn run(&self, task: &TaskDescriptor, _ctx: &TaskContext) -> Result<Value> {
        let mut output = json!({
            "status": "completed",
            "task": task.name,
        });
        if let Some(description) = task.description() {
            output["description"] = Value::String(description.to_string());
        }
        Ok(output)
    }
}

/// Run one task on the current worker, capturing errors and panics
fn run_task(handler: &dyn TaskHandler, task: &TaskDescriptor, ctx: &TaskContext) -> TaskResult {
    trace!("Running task '{}'", task.name);

    let result = match panic::catch_unwind(AssertUnwindSafe(|| handler.run(task, ctx))) {
        Ok(Ok(output)) => TaskResult::Completed {
            task: task.name.clone(),
            output,
        },
        Ok(Err(e)) => TaskResult::failed(&task.name, &e),
        Err(payload) => {
            let cause = format!("task panicked: {}", panic_message(payload.as_ref()));
            TaskResult::failed(&task.name, &EngineError::execution(&task.name, cause))
        }
    };

    record_outcome(&result);
    result
}

fn record_outcome(result: &TaskResult) {
    let outcome = match result.state() {
        TaskState::Completed => "completed",
        TaskState::Failed => "failed",
        TaskState::TimedOut => "timed_out",
    };
    metrics::counter!("accelerate_tasks_total", "outcome" => outcome).increment(1);
}

/// Task executor with a bounded worker pool
pub struct AcceleratedTaskExecutor {
    /// Backend chosen at construction
    backend: Backend,

    /// Worker pool
    dispatcher: Arc<dyn Dispatcher>,

    /// Work done per task
    handler: Arc<dyn TaskHandler>,
}

impl AcceleratedTaskExecutor {
    /// Create an executor using the process-wide resolver and configuration
    pub fn new() -> Result<Self> {
        Self::with_resolver(global_resolver())
    }

    pub fn with_resolver(resolver: &BackendResolver) -> Result<Self> {
        let backend = resolver.resolve(Component::Tasks);
        let max_concurrency = resolver.config().runtime.max_concurrent_tasks;
        Self::with_backend(backend, max_concurrency)
    }

    /// Create an executor on an explicit backend, running at most
    /// `max_concurrency` tasks at once
    pub fn with_backend(backend: Backend, max_concurrency: usize) -> Result<Self> {
        let dispatcher = build_dispatcher(backend, max_concurrency)?;
        info!(
            "Task executor ready ({} backend, {} workers)",
            backend,
            dispatcher.capacity()
        );

        Ok(Self {
            backend,
            dispatcher,
            handler: Arc::new(DefaultTaskHandler),
        })
    }

    /// Replace the handler run for every task
    pub fn with_handler(mut self, handler: impl TaskHandler) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    pub fn implementation(&self) -> Backend {
        self.backend
    }

    pub fn max_concurrency(&self) -> usize {
        self.dispatcher.capacity()
    }

    pub fn stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    /// Run every task, returning one result per task in input order
    pub fn execute_concurrent_tasks<T>(&self, tasks: Vec<T>) -> Vec<TaskResult>
    where
        T: Into<TaskDescriptor>,
    {
        let batch = Ulid::new();
        let total = tasks.len();
        debug!("Batch {} submitting {} tasks", batch, total);

        let mut slots: Vec<Option<TaskResult>> = vec![None; total];
        let mut names: Vec<String> = Vec::with_capacity(total);
        let (tx, rx) = crossbeam_channel::unbounded::<(usize, TaskResult)>();

        for (index, task) in tasks.into_iter().enumerate() {
            let task: TaskDescriptor = task.into();
            names.push(task.name.clone());

            let tx = tx.clone();
            let handler = Arc::clone(&self.handler);
            let job = Box::new(move || {
                let ctx = TaskContext::new(None);
                let result = run_task(handler.as_ref(), &task, &ctx);
                let _ = tx.send((index, result));
            });

            if let Err(e) = self.dispatcher.submit(job) {
                warn!("Batch {} could not submit task {}: {}", batch, index, e);
                slots[index] = Some(TaskResult::failed(&names[index], &e));
            }
        }
        drop(tx);

        // Ends once every submitted job has replied or been dropped
        for (index, result) in rx.iter() {
            slots[index] = Some(result);
        }

        let results: Vec<TaskResult> = slots
            .into_iter()
            .zip(names)
            .map(|(slot, name)| {
                slot.unwrap_or_else(|| {
                    TaskResult::failed(
                        &name,
                        &EngineError::execution(&name, "task dropped before completion"),
                    )
                })
            })
            .collect();

        debug!(
            "Batch {} finished: {}/{} completed",
            batch,
            results.iter().filter(|r| r.is_success()).count(),
            total
        );
        results
    }

    /// Run one task, giving up after `timeout` measured from submission.
    /// A timeout too large to represent as an instant waits for completion.
    pub fn execute_task_with_timeout(
        &self,
        task: impl Into<TaskDescriptor>,
        timeout: Duration,
    ) -> TaskResult {
        let task: TaskDescriptor = task.into();
        let name = task.name.clone();
        let started = Instant::now();

        let deadline = started.checked_add(timeout);
        let ctx = TaskContext::new(deadline);
        let cancel = ctx.cancel.clone();
        let (tx, rx) = crossbeam_channel::bounded::<TaskResult>(1);
        let handler = Arc::clone(&self.handler);

        let job = Box::new(move || {
            if ctx.is_cancelled() {
                trace!("Skipping abandoned task '{}'", task.name);
                return;
            }
            let result = run_task(handler.as_ref(), &task, &ctx);
            let _ = tx.send(result);
        });

        if let Err(e) = self.dispatcher.submit(job) {
            return TaskResult::failed(&name, &e);
        }

        let received = match deadline {
            Some(deadline) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(RecvTimeoutError::from),
        };
        match received {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                cancel.cancel();
                warn!(
                    "Task '{}' timed out after {:?}, abandoning it",
                    name,
                    started.elapsed()
                );
                let result = TaskResult::TimedOut {
                    task: name,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                };
                record_outcome(&result);
                result
            }
            Err(RecvTimeoutError::Disconnected) => TaskResult::failed(
                &name,
                &EngineError::execution(&name, "task dropped before completion"),
            ),
        }
    }

    /// [`execute_task_with_timeout`](Self::execute_task_with_timeout) taking
    /// fractional seconds. Zero, negative and NaN values mean "no wait";
    /// infinite or unrepresentably large values wait until the task finishes.
    pub fn execute_task_with_timeout_secs(
        &self,
        task: impl Into<TaskDescriptor>,
        timeout_seconds: f64,
    ) -> TaskResult {
        let timeout = if timeout_seconds.is_nan() || timeout_seconds <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(timeout_seconds).unwrap_or(Duration::MAX)
        };
        self.execute_task_with_timeout(task, timeout)
    }
}
