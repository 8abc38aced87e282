//! Task data model and handler types.
//!
//! A task is the fundamental unit of work: an opaque handler plus arguments,
//! a retry policy, an optional timeout, and a set of dependencies on other
//! tasks. The orchestrator owns each task record for its entire lifetime and
//! drives it through the status state machine.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::retry::RetryPolicy;
use super::types::TaskId;

/// Errors raised by task handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Handler execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Handler exceeded the task's timeout.
    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    /// A transient error that may succeed on retry.
    #[error("transient error: {0}")]
    Transient(String),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Check if this error is considered transient (should trigger retry
    /// under `RetryCondition::TransientOnly`).
    pub fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Transient(_) | HandlerError::Timeout(_))
    }
}

/// Positional and keyword arguments passed to a handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskArgs {
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Keyword arguments.
    pub kwargs: HashMap<String, Value>,
}

impl TaskArgs {
    /// Create empty arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from positional arguments only.
    pub fn positional(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: HashMap::new(),
        }
    }

    /// Builder: append a positional argument.
    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Builder: set a keyword argument.
    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Look up a keyword argument.
    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }
}

/// An async task handler.
#[async_trait]
pub trait AsyncHandler: Send + Sync {
    /// Run the handler with the given arguments.
    async fn call(&self, args: TaskArgs) -> Result<Value, HandlerError>;
}

/// A synchronous/blocking task handler.
///
/// Blocking handlers are dispatched to the runtime's blocking thread pool so
/// they never stall the scheduling loop.
pub trait BlockingHandler: Send + Sync {
    /// Run the handler with the given arguments.
    fn call(&self, args: TaskArgs) -> Result<Value, HandlerError>;
}

type BoxedHandlerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>;

struct AsyncFnHandler {
    f: Box<dyn Fn(TaskArgs) -> BoxedHandlerFuture + Send + Sync>,
}

#[async_trait]
impl AsyncHandler for AsyncFnHandler {
    async fn call(&self, args: TaskArgs) -> Result<Value, HandlerError> {
        (self.f)(args).await
    }
}

struct BlockingFnHandler {
    f: Box<dyn Fn(TaskArgs) -> Result<Value, HandlerError> + Send + Sync>,
}

impl BlockingHandler for BlockingFnHandler {
    fn call(&self, args: TaskArgs) -> Result<Value, HandlerError> {
        (self.f)(args)
    }
}

/// A task handler, tagged by kind at registration time.
///
/// The sync/async distinction is resolved once when the handler is created,
/// not inspected at call time.
#[derive(Clone)]
pub enum Handler {
    /// Handler that runs on the async scheduler.
    Async(Arc<dyn AsyncHandler>),
    /// Handler that runs on the blocking thread pool.
    Blocking(Arc<dyn BlockingHandler>),
}

impl Handler {
    /// Wrap an async closure as a handler.
    pub fn from_async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Handler::Async(Arc::new(AsyncFnHandler {
            f: Box::new(move |args| Box::pin(f(args))),
        }))
    }

    /// Wrap a blocking closure as a handler.
    pub fn from_blocking_fn<F>(f: F) -> Self
    where
        F: Fn(TaskArgs) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        Handler::Blocking(Arc::new(BlockingFnHandler { f: Box::new(f) }))
    }

    /// Invoke the handler.
    ///
    /// Blocking handlers are moved onto `spawn_blocking`; a panic inside a
    /// blocking handler surfaces as a `HandlerError` rather than tearing down
    /// the worker.
    pub async fn invoke(&self, args: TaskArgs) -> Result<Value, HandlerError> {
        match self {
            Handler::Async(h) => h.call(args).await,
            Handler::Blocking(h) => {
                let h = Arc::clone(h);
                tokio::task::spawn_blocking(move || h.call(args))
                    .await
                    .map_err(|e| {
                        HandlerError::ExecutionFailed(format!("blocking handler panicked: {e}"))
                    })?
            }
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Async(_) => f.write_str("Handler::Async"),
            Handler::Blocking(_) => f.write_str("Handler::Blocking"),
        }
    }
}

/// Task priority.
///
/// Reserved: the work queue is FIFO by enqueue time and does not consult
/// priority when dequeuing.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for dependencies or a worker.
    Pending,
    /// Currently executing.
    Running,
    /// Failed and waiting out the retry delay before re-entering Pending.
    Retrying,
    /// Completed successfully. Terminal.
    Completed,
    /// Failed after exhausting retries. Terminal.
    Failed,
    /// Explicitly cancelled. Terminal.
    Cancelled,
}

impl TaskStatus {
    /// Check if this status is terminal (no further automatic transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Result of a task's execution, attached once the task reaches a terminal
/// status.
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// The task that was executed.
    pub task_id: TaskId,
    /// Terminal status the task reached.
    pub status: TaskStatus,
    /// Value returned by the handler, if it succeeded.
    pub value: Option<Value>,
    /// Error message, if the task failed.
    pub error: Option<String>,
    /// Wall-clock time of the final attempt.
    pub execution_time: Duration,
    /// Retries performed before this result was produced.
    pub retry_count: u32,
    /// When the result was produced.
    pub timestamp: DateTime<Utc>,
    /// Free-form metadata.
    pub metadata: HashMap<String, Value>,
}

impl TaskResult {
    /// Create a successful result.
    pub fn completed(task_id: TaskId, value: Value, execution_time: Duration) -> Self {
        Self {
            task_id,
            status: TaskStatus::Completed,
            value: Some(value),
            error: None,
            execution_time,
            retry_count: 0,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Create a failed result.
    pub fn failed(task_id: TaskId, error: impl Into<String>, execution_time: Duration) -> Self {
        Self {
            task_id,
            status: TaskStatus::Failed,
            value: None,
            error: Some(error.into()),
            execution_time,
            retry_count: 0,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Set the number of retries that preceded this result.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// Specification for submitting a new task.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Explicit id. Generated if not set. Setting one lets later
    /// submissions declare dependencies on it by name.
    pub id: Option<TaskId>,
    /// Human-readable name.
    pub name: String,
    /// The handler to execute.
    pub handler: Handler,
    /// Arguments passed to the handler.
    pub args: TaskArgs,
    /// Priority (reserved, see [`Priority`]).
    pub priority: Priority,
    /// Retry policy.
    pub retry_policy: RetryPolicy,
    /// Optional wall-clock timeout per attempt.
    pub timeout: Option<Duration>,
    /// Tasks that must complete before this one runs.
    pub dependencies: Vec<TaskId>,
    /// Free-form metadata.
    pub metadata: HashMap<String, Value>,
}

impl TaskSpec {
    /// Create a spec with the given name and handler; everything else takes
    /// defaults.
    pub fn new(name: impl Into<String>, handler: Handler) -> Self {
        Self {
            id: None,
            name: name.into(),
            handler,
            args: TaskArgs::new(),
            priority: Priority::default(),
            retry_policy: RetryPolicy::default(),
            timeout: None,
            dependencies: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Set an explicit task id.
    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the handler arguments.
    pub fn with_args(mut self, args: TaskArgs) -> Self {
        self.args = args;
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add a dependency on another task.
    pub fn with_dependency(mut self, dep: impl Into<TaskId>) -> Self {
        self.dependencies.push(dep.into());
        self
    }

    /// Set all dependencies at once.
    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Set a metadata value.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A task record owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique identifier.
    pub id: TaskId,
    /// Human-readable name.
    pub name: String,
    /// The handler to execute.
    pub handler: Handler,
    /// Arguments passed to the handler.
    pub args: TaskArgs,
    /// Priority (reserved).
    pub priority: Priority,
    /// Retry policy.
    pub retry_policy: RetryPolicy,
    /// Optional wall-clock timeout per attempt.
    pub timeout: Option<Duration>,
    /// Tasks that must complete before this one runs.
    pub dependencies: Vec<TaskId>,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// When the task was submitted.
    pub created_at: DateTime<Utc>,
    /// When the task first started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of retries performed so far.
    pub retry_count: u32,
    /// Result, once terminal.
    pub result: Option<TaskResult>,
    /// Free-form metadata.
    pub metadata: HashMap<String, Value>,
    /// Whether the task currently sits in the work queue. Guards the
    /// exactly-once enqueue per Pending-to-ready transition.
    pub(crate) queued: bool,
}

impl Task {
    /// Build a new Pending task from a spec, generating an id if the spec
    /// carries none.
    pub fn from_spec(spec: TaskSpec) -> Self {
        Self {
            id: spec.id.unwrap_or_else(TaskId::generate),
            name: spec.name,
            handler: spec.handler,
            args: spec.args,
            priority: spec.priority,
            retry_policy: spec.retry_policy,
            timeout: spec.timeout,
            dependencies: spec.dependencies,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            result: None,
            metadata: spec.metadata,
            queued: false,
        }
    }

    /// Check if the task is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark the task as running.
    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.queued = false;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Mark the task as completed and attach the result.
    pub fn mark_completed(&mut self, result: TaskResult) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
    }

    /// Mark the task as failed and attach the result.
    pub fn mark_failed(&mut self, result: TaskResult) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
    }

    /// Mark the task as retrying after a failed attempt.
    pub fn mark_retrying(&mut self) {
        self.status = TaskStatus::Retrying;
        self.retry_count += 1;
    }

    /// Return the task to Pending for re-enqueue after its retry delay.
    ///
    /// Sets the queued flag so the background sweep does not enqueue it a
    /// second time.
    pub fn mark_requeued(&mut self) {
        self.status = TaskStatus::Pending;
        self.queued = true;
    }

    /// Mark the task as cancelled.
    pub fn mark_cancelled(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }
}
