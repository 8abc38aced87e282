//! Single-task execution.
//!
//! The `TaskExecutor` runs one task attempt: it claims the task out of the
//! queue-fed Pending state, invokes the handler under the optional timeout,
//! and drives the status state machine. Timeout expiry is funneled through
//! the same failure path as any other handler error. A failed attempt with
//! retry budget left re-enters the queue after the retry delay; otherwise
//! the task is terminal with a `TaskResult` attached.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info_span, warn, Instrument};

use crate::core::retry::RetryPolicy;
use crate::core::task::{Handler, HandlerError, TaskArgs, TaskResult, TaskStatus};
use crate::core::types::TaskId;
use crate::events::{Event, EventBus};
use crate::engine::queue::WorkQueue;
use crate::store::TaskStore;

/// Snapshot of the fields needed to run one attempt, taken while the task is
/// claimed under the store lock.
struct Attempt {
    handler: Handler,
    args: TaskArgs,
    timeout: Option<std::time::Duration>,
    retry_policy: RetryPolicy,
    retry_count: u32,
}

/// Executes individual tasks against the store, emitting lifecycle events.
pub struct TaskExecutor {
    tasks: Arc<TaskStore>,
    queue: Arc<WorkQueue>,
    events: Arc<EventBus>,
}

impl TaskExecutor {
    /// Create an executor over the given store, queue, and event bus.
    pub fn new(tasks: Arc<TaskStore>, queue: Arc<WorkQueue>, events: Arc<EventBus>) -> Self {
        Self {
            tasks,
            queue,
            events,
        }
    }

    /// Execute one attempt of the given task.
    ///
    /// A task that is no longer Pending (cancelled while queued, or already
    /// claimed) is skipped. Status updates are guarded against concurrent
    /// cancellation: a terminal status set elsewhere is never overwritten.
    pub async fn execute(&self, task_id: TaskId) {
        let span = info_span!("task_execution", task = %task_id);
        self.execute_inner(task_id).instrument(span).await;
    }

    async fn execute_inner(&self, task_id: TaskId) {
        // Claim: Pending -> Running, snapshotting the attempt inputs under
        // the same lock.
        let claim = self.tasks.update(&task_id, |t| {
            if t.status != TaskStatus::Pending {
                return None;
            }
            t.mark_running();
            Some(Attempt {
                handler: t.handler.clone(),
                args: t.args.clone(),
                timeout: t.timeout,
                retry_policy: t.retry_policy.clone(),
                retry_count: t.retry_count,
            })
        });

        let attempt = match claim {
            Ok(Some(attempt)) => attempt,
            Ok(None) => {
                debug!(task = %task_id, "task no longer pending, skipping");
                return;
            }
            Err(e) => {
                warn!(task = %task_id, error = %e, "failed to claim task");
                return;
            }
        };

        self.events.emit(Event::task_started(task_id.clone())).await;

        let start = Instant::now();
        let outcome = match attempt.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, attempt.handler.invoke(attempt.args.clone()))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(HandlerError::Timeout(limit)),
                }
            }
            None => attempt.handler.invoke(attempt.args.clone()).await,
        };
        let elapsed = start.elapsed();

        match outcome {
            Ok(value) => {
                let result = TaskResult::completed(task_id.clone(), value, elapsed)
                    .with_retry_count(attempt.retry_count);
                let transitioned = self.tasks.update(&task_id, |t| {
                    if t.status == TaskStatus::Running {
                        t.mark_completed(result);
                        true
                    } else {
                        false
                    }
                });
                match transitioned {
                    Ok(true) => {
                        debug!(task = %task_id, duration_ms = %elapsed.as_millis(), "task completed");
                        self.events
                            .emit(Event::task_completed(task_id, elapsed))
                            .await;
                    }
                    Ok(false) => {
                        debug!(task = %task_id, "task finished but was cancelled, result dropped");
                    }
                    Err(e) => warn!(task = %task_id, error = %e, "failed to record completion"),
                }
            }
            Err(err) => {
                if attempt.retry_policy.should_retry(&err, attempt.retry_count) {
                    self.retry(task_id, &attempt, &err).await;
                } else {
                    let result = TaskResult::failed(task_id.clone(), err.to_string(), elapsed)
                        .with_retry_count(attempt.retry_count);
                    let transitioned = self.tasks.update(&task_id, |t| {
                        if t.status == TaskStatus::Running {
                            t.mark_failed(result);
                            true
                        } else {
                            false
                        }
                    });
                    match transitioned {
                        Ok(true) => {
                            debug!(task = %task_id, error = %err, "task failed");
                            self.events
                                .emit(Event::task_failed(task_id, err.to_string()))
                                .await;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!(task = %task_id, error = %e, "failed to record failure")
                        }
                    }
                }
            }
        }
    }

    /// Mark the task Retrying, wait out the delay, and re-enqueue it.
    async fn retry(&self, task_id: TaskId, attempt: &Attempt, err: &HandlerError) {
        let transitioned = self.tasks.update(&task_id, |t| {
            if t.status == TaskStatus::Running {
                t.mark_retrying();
                true
            } else {
                false
            }
        });

        match transitioned {
            Ok(true) => {}
            Ok(false) => return, // cancelled mid-flight
            Err(e) => {
                warn!(task = %task_id, error = %e, "failed to mark task retrying");
                return;
            }
        }

        let retry_attempt = attempt.retry_count + 1;
        debug!(
            task = %task_id,
            attempt = retry_attempt,
            max_retries = attempt.retry_policy.max_retries,
            error = %err,
            "task attempt failed, retrying"
        );
        self.events
            .emit(Event::task_retrying(
                task_id.clone(),
                retry_attempt,
                attempt.retry_policy.max_retries,
            ))
            .await;

        tokio::time::sleep(attempt.retry_policy.delay_for(retry_attempt)).await;

        // Back to Pending with the queued flag set, then onto the queue.
        // Cancellation during the delay wins.
        let requeued = self.tasks.update(&task_id, |t| {
            if t.status == TaskStatus::Retrying {
                t.mark_requeued();
                true
            } else {
                false
            }
        });

        match requeued {
            Ok(true) => {
                if let Err(e) = self.queue.enqueue(task_id.clone()) {
                    warn!(task = %task_id, error = %e, "failed to re-enqueue retrying task");
                    let _ = self.tasks.update(&task_id, |t| t.queued = false);
                }
            }
            Ok(false) => {}
            Err(e) => warn!(task = %task_id, error = %e, "failed to requeue task"),
        }
    }
}
