//! Lifecycle events and event handling.
//!
//! The executors emit events for task and workflow lifecycle transitions.
//! Handlers are isolated: a failing handler is logged and never affects the
//! triggering transition or the other handlers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

use crate::core::types::{TaskId, WorkflowId};

/// Errors returned by event handlers.
///
/// These never propagate past the event bus; they exist so handlers can
/// report failure without panicking.
#[derive(Debug, Error)]
pub enum EventError {
    /// Handler failed with a message.
    #[error("event handler failed: {0}")]
    Failed(String),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// The kind of a lifecycle event, used for filtered registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskRetrying,
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
}

/// Lifecycle events emitted during orchestration.
#[derive(Debug, Clone)]
pub enum Event {
    /// A task has started execution.
    TaskStarted {
        task_id: TaskId,
        timestamp: DateTime<Utc>,
    },

    /// A task completed successfully.
    TaskCompleted {
        task_id: TaskId,
        duration: Duration,
        timestamp: DateTime<Utc>,
    },

    /// A task failed after exhausting its retries.
    TaskFailed {
        task_id: TaskId,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A task attempt failed and the task will be retried.
    ///
    /// Emitted immediately before the retry delay, so consumers observe
    /// retries in real time. `attempt` is the retry about to happen
    /// (1-indexed); `max_retries` is the policy ceiling.
    TaskRetrying {
        task_id: TaskId,
        attempt: u32,
        max_retries: u32,
        timestamp: DateTime<Utc>,
    },

    /// A workflow has started execution.
    WorkflowStarted {
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },

    /// A workflow completed with every member task successful.
    WorkflowCompleted {
        workflow_id: WorkflowId,
        duration: Duration,
        timestamp: DateTime<Utc>,
    },

    /// A workflow finished with at least one failed member task.
    WorkflowFailed {
        workflow_id: WorkflowId,
        failed_tasks: Vec<TaskId>,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Get the kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::TaskStarted { .. } => EventKind::TaskStarted,
            Event::TaskCompleted { .. } => EventKind::TaskCompleted,
            Event::TaskFailed { .. } => EventKind::TaskFailed,
            Event::TaskRetrying { .. } => EventKind::TaskRetrying,
            Event::WorkflowStarted { .. } => EventKind::WorkflowStarted,
            Event::WorkflowCompleted { .. } => EventKind::WorkflowCompleted,
            Event::WorkflowFailed { .. } => EventKind::WorkflowFailed,
        }
    }

    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::TaskStarted { timestamp, .. } => *timestamp,
            Event::TaskCompleted { timestamp, .. } => *timestamp,
            Event::TaskFailed { timestamp, .. } => *timestamp,
            Event::TaskRetrying { timestamp, .. } => *timestamp,
            Event::WorkflowStarted { timestamp, .. } => *timestamp,
            Event::WorkflowCompleted { timestamp, .. } => *timestamp,
            Event::WorkflowFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Create a TaskStarted event.
    pub fn task_started(task_id: TaskId) -> Self {
        Event::TaskStarted {
            task_id,
            timestamp: Utc::now(),
        }
    }

    /// Create a TaskCompleted event.
    pub fn task_completed(task_id: TaskId, duration: Duration) -> Self {
        Event::TaskCompleted {
            task_id,
            duration,
            timestamp: Utc::now(),
        }
    }

    /// Create a TaskFailed event.
    pub fn task_failed(task_id: TaskId, error: String) -> Self {
        Event::TaskFailed {
            task_id,
            error,
            timestamp: Utc::now(),
        }
    }

    /// Create a TaskRetrying event.
    pub fn task_retrying(task_id: TaskId, attempt: u32, max_retries: u32) -> Self {
        Event::TaskRetrying {
            task_id,
            attempt,
            max_retries,
            timestamp: Utc::now(),
        }
    }

    /// Create a WorkflowStarted event.
    pub fn workflow_started(workflow_id: WorkflowId) -> Self {
        Event::WorkflowStarted {
            workflow_id,
            timestamp: Utc::now(),
        }
    }

    /// Create a WorkflowCompleted event.
    pub fn workflow_completed(workflow_id: WorkflowId, duration: Duration) -> Self {
        Event::WorkflowCompleted {
            workflow_id,
            duration,
            timestamp: Utc::now(),
        }
    }

    /// Create a WorkflowFailed event.
    pub fn workflow_failed(workflow_id: WorkflowId, failed_tasks: Vec<TaskId>) -> Self {
        Event::WorkflowFailed {
            workflow_id,
            failed_tasks,
            timestamp: Utc::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event. Errors are logged by the bus and never propagate.
    async fn handle(&self, event: &Event) -> Result<(), EventError>;
}

struct Registration {
    filter: Option<EventKind>,
    handler: Arc<dyn EventHandler>,
}

/// Event bus for distributing events to registered handlers.
///
/// Handlers are invoked in registration order. A handler that returns an
/// error is logged and skipped; it cannot block other handlers or the
/// lifecycle transition that triggered the event.
pub struct EventBus {
    handlers: RwLock<Vec<Registration>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register a handler for all events.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(Registration {
            filter: None,
            handler,
        });
    }

    /// Register a handler for a single event kind.
    pub async fn register_filtered(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(Registration {
            filter: Some(kind),
            handler,
        });
    }

    /// Emit an event to all matching handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        let kind = event.kind();
        for registration in handlers.iter() {
            if let Some(filter) = registration.filter {
                if filter != kind {
                    continue;
                }
            }
            if let Err(e) = registration.handler.handle(&event).await {
                warn!(kind = ?kind, error = %e, "event handler failed");
            }
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    /// Test handler that records received events.
    struct RecordingHandler {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingHandler {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        async fn events(&self) -> Vec<Event> {
            self.events.lock().await.clone()
        }
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: &Event) -> Result<(), EventError> {
            self.events.lock().await.push(event.clone());
            Ok(())
        }
    }

    /// Test handler that counts events.
    struct CountingHandler {
        count: AtomicU32,
    }

    impl CountingHandler {
        fn new() -> Self {
            Self {
                count: AtomicU32::new(0),
            }
        }

        fn count(&self) -> u32 {
            self.count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &Event) -> Result<(), EventError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Test handler that always fails.
    struct FailingHandler;

    #[async_trait]
    impl EventHandler for FailingHandler {
        async fn handle(&self, _event: &Event) -> Result<(), EventError> {
            Err(EventError::Failed("intentional".to_string()))
        }
    }

    #[tokio::test]
    async fn test_emit_task_started_event() {
        let handler = Arc::new(RecordingHandler::new());
        let bus = EventBus::new();
        bus.register(handler.clone()).await;

        bus.emit(Event::task_started(TaskId::new("extract"))).await;

        let events = handler.events().await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::TaskStarted { task_id, .. } => {
                assert_eq!(task_id.as_str(), "extract");
            }
            _ => panic!("Expected TaskStarted event"),
        }
    }

    #[tokio::test]
    async fn test_emit_task_retrying_event_with_attempt_count() {
        let handler = Arc::new(RecordingHandler::new());
        let bus = EventBus::new();
        bus.register(handler.clone()).await;

        bus.emit(Event::task_retrying(TaskId::new("flaky"), 2, 5))
            .await;

        let events = handler.events().await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::TaskRetrying {
                task_id,
                attempt,
                max_retries,
                ..
            } => {
                assert_eq!(task_id.as_str(), "flaky");
                assert_eq!(*attempt, 2);
                assert_eq!(*max_retries, 5);
            }
            _ => panic!("Expected TaskRetrying event"),
        }
    }

    #[tokio::test]
    async fn test_emit_workflow_failed_event() {
        let handler = Arc::new(RecordingHandler::new());
        let bus = EventBus::new();
        bus.register(handler.clone()).await;

        bus.emit(Event::workflow_failed(
            WorkflowId::new("nightly"),
            vec![TaskId::new("load")],
        ))
        .await;

        let events = handler.events().await;
        match &events[0] {
            Event::WorkflowFailed {
                workflow_id,
                failed_tasks,
                ..
            } => {
                assert_eq!(workflow_id.as_str(), "nightly");
                assert_eq!(failed_tasks, &vec![TaskId::new("load")]);
            }
            _ => panic!("Expected WorkflowFailed event"),
        }
    }

    #[tokio::test]
    async fn test_multiple_handlers_receive_same_event() {
        let handler1 = Arc::new(CountingHandler::new());
        let handler2 = Arc::new(CountingHandler::new());

        let bus = EventBus::new();
        bus.register(handler1.clone()).await;
        bus.register(handler2.clone()).await;

        bus.emit(Event::task_started(TaskId::new("t"))).await;

        assert_eq!(handler1.count(), 1);
        assert_eq!(handler2.count(), 1);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_others() {
        let counting = Arc::new(CountingHandler::new());
        let bus = EventBus::new();

        // Failing handler registered first; the second still runs.
        bus.register(Arc::new(FailingHandler)).await;
        bus.register(counting.clone()).await;

        bus.emit(Event::task_completed(
            TaskId::new("t"),
            Duration::from_millis(5),
        ))
        .await;

        assert_eq!(counting.count(), 1);
    }

    #[tokio::test]
    async fn test_filtered_registration_only_matches_kind() {
        let started = Arc::new(CountingHandler::new());
        let failed = Arc::new(CountingHandler::new());

        let bus = EventBus::new();
        bus.register_filtered(EventKind::TaskStarted, started.clone())
            .await;
        bus.register_filtered(EventKind::TaskFailed, failed.clone())
            .await;

        bus.emit(Event::task_started(TaskId::new("t"))).await;
        bus.emit(Event::task_started(TaskId::new("t2"))).await;
        bus.emit(Event::task_failed(TaskId::new("t"), "oops".to_string()))
            .await;

        assert_eq!(started.count(), 2);
        assert_eq!(failed.count(), 1);
    }

    #[tokio::test]
    async fn test_no_handlers_does_not_panic() {
        let bus = EventBus::new();
        bus.emit(Event::task_started(TaskId::new("t"))).await;
    }

    #[tokio::test]
    async fn test_events_arrive_in_emission_order() {
        let handler = Arc::new(RecordingHandler::new());
        let bus = EventBus::new();
        bus.register(handler.clone()).await;

        bus.emit(Event::task_started(TaskId::new("t1"))).await;
        bus.emit(Event::task_completed(
            TaskId::new("t1"),
            Duration::from_millis(100),
        ))
        .await;
        bus.emit(Event::task_failed(TaskId::new("t2"), "oops".to_string()))
            .await;

        let events = handler.events().await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], Event::TaskStarted { .. }));
        assert!(matches!(events[1], Event::TaskCompleted { .. }));
        assert!(matches!(events[2], Event::TaskFailed { .. }));
    }
}
