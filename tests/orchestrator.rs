//! End-to-end tests of the orchestrator: submission, dependency ordering,
//! retries, concurrency limits, workflow aggregation, cancellation, and
//! lifecycle events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use gantry::{
    Event, EventError, EventHandler, EventKind, Handler, HandlerError, Orchestrator,
    OrchestratorConfig, RetryPolicy, TaskId, TaskSpec, TaskStatus, WorkflowStatus,
};

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig::new()
        .with_max_workers(4)
        .with_resolver_interval(Duration::from_millis(20))
        .with_poll_interval(Duration::from_millis(10))
        .with_dequeue_timeout(Duration::from_millis(10))
}

fn noop_handler() -> Handler {
    Handler::from_async_fn(|_args| async { Ok(Value::Null) })
}

async fn wait_for_status(
    orch: &Orchestrator,
    id: &TaskId,
    expected: TaskStatus,
) -> TaskStatus {
    for _ in 0..300 {
        let status = orch.task_status(id).expect("task should exist");
        if status == expected || status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    orch.task_status(id).expect("task should exist")
}

#[tokio::test]
async fn independent_task_runs_to_completion() {
    let orch = Orchestrator::new(fast_config());
    orch.start();

    let id = orch
        .add_task(TaskSpec::new(
            "greet",
            Handler::from_async_fn(|_args| async { Ok(json!("hello")) }),
        ))
        .unwrap();

    let status = wait_for_status(&orch, &id, TaskStatus::Completed).await;
    assert_eq!(status, TaskStatus::Completed);

    let result = orch.task_result(&id).unwrap();
    assert_eq!(result.value, Some(json!("hello")));
    assert!(result.error.is_none());

    orch.shutdown().await;
}

#[tokio::test]
async fn dependent_task_runs_only_after_dependency_completes() {
    let orch = Orchestrator::new(fast_config());
    orch.start();

    let a_done = Arc::new(AtomicBool::new(false));
    let a_done_writer = Arc::clone(&a_done);
    let b_saw_a_done = Arc::new(AtomicBool::new(false));
    let b_probe = Arc::clone(&b_saw_a_done);

    let a = orch
        .add_task(TaskSpec::new(
            "a",
            Handler::from_async_fn(move |_args| {
                let a_done = Arc::clone(&a_done_writer);
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    a_done.store(true, Ordering::SeqCst);
                    Ok(json!(42))
                }
            }),
        ))
        .unwrap();

    let a_flag = Arc::clone(&a_done);
    let b = orch
        .add_task(
            TaskSpec::new(
                "b",
                Handler::from_async_fn(move |_args| {
                    let probe = Arc::clone(&b_probe);
                    let a_flag = Arc::clone(&a_flag);
                    async move {
                        probe.store(a_flag.load(Ordering::SeqCst), Ordering::SeqCst);
                        Ok(Value::Null)
                    }
                }),
            )
            .with_dependency(a.clone()),
        )
        .unwrap();

    assert_eq!(
        wait_for_status(&orch, &b, TaskStatus::Completed).await,
        TaskStatus::Completed
    );
    assert!(b_saw_a_done.load(Ordering::SeqCst));
    assert_eq!(orch.task_result(&a).unwrap().value, Some(json!(42)));

    orch.shutdown().await;
}

#[tokio::test]
async fn failing_task_retries_then_succeeds() {
    let orch = Orchestrator::new(fast_config());
    orch.start();

    let remaining_failures = Arc::new(AtomicU32::new(2));
    let counter = Arc::clone(&remaining_failures);

    let id = orch
        .add_task(
            TaskSpec::new(
                "flaky",
                Handler::from_async_fn(move |_args| {
                    let counter = Arc::clone(&counter);
                    async move {
                        if counter.fetch_sub(1, Ordering::SeqCst) > 0 {
                            Err(HandlerError::Transient("not yet".to_string()))
                        } else {
                            Ok(json!("finally"))
                        }
                    }
                }),
            )
            .with_retry_policy(RetryPolicy::fixed(3, Duration::from_millis(5))),
        )
        .unwrap();

    assert_eq!(
        wait_for_status(&orch, &id, TaskStatus::Completed).await,
        TaskStatus::Completed
    );
    // Exactly two retries happened before the success.
    let result = orch.task_result(&id).unwrap();
    assert_eq!(result.value, Some(json!("finally")));
    assert_eq!(result.retry_count, 2);

    orch.shutdown().await;
}

#[tokio::test]
async fn retries_exhaust_into_failed_status() {
    let orch = Orchestrator::new(fast_config());
    orch.start();

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let id = orch
        .add_task(
            TaskSpec::new(
                "hopeless",
                Handler::from_async_fn(move |_args| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(HandlerError::ExecutionFailed("always broken".to_string()))
                    }
                }),
            )
            .with_retry_policy(RetryPolicy::fixed(2, Duration::from_millis(5))),
        )
        .unwrap();

    assert_eq!(
        wait_for_status(&orch, &id, TaskStatus::Failed).await,
        TaskStatus::Failed
    );
    // Initial attempt plus two retries.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let result = orch.task_result(&id).unwrap();
    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.retry_count, 2);
    assert!(result.error.unwrap().contains("always broken"));

    orch.shutdown().await;
}

#[tokio::test]
async fn timed_out_task_fails_with_timeout_error() {
    let orch = Orchestrator::new(fast_config());
    orch.start();

    let id = orch
        .add_task(
            TaskSpec::new(
                "slow",
                Handler::from_async_fn(|_args| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(Value::Null)
                }),
            )
            .with_timeout(Duration::from_millis(30)),
        )
        .unwrap();

    assert_eq!(
        wait_for_status(&orch, &id, TaskStatus::Failed).await,
        TaskStatus::Failed
    );
    let result = orch.task_result(&id).unwrap();
    assert!(result.error.unwrap().contains("timed out"));

    orch.shutdown().await;
}

#[tokio::test]
async fn concurrent_executions_stay_under_the_cap() {
    let orch = Orchestrator::new(
        fast_config()
            .with_max_workers(8)
            .with_max_concurrent_tasks(3),
    );
    orch.start();

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let ids: Vec<TaskId> = (0..12)
        .map(|i| {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            orch.add_task(TaskSpec::new(
                format!("task_{i}"),
                Handler::from_async_fn(move |_args| {
                    let current = Arc::clone(&current);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                        Ok(Value::Null)
                    }
                }),
            ))
            .unwrap()
        })
        .collect();

    for id in &ids {
        assert_eq!(
            wait_for_status(&orch, id, TaskStatus::Completed).await,
            TaskStatus::Completed
        );
    }
    assert!(
        peak.load(Ordering::SeqCst) <= 3,
        "peak concurrency {} exceeded the cap",
        peak.load(Ordering::SeqCst)
    );

    orch.shutdown().await;
}

#[tokio::test]
async fn workflow_completes_when_all_members_complete() {
    let orch = Orchestrator::new(fast_config());
    orch.start();

    let a = orch
        .add_task(TaskSpec::new("extract", noop_handler()))
        .unwrap();
    let b = orch
        .add_task(TaskSpec::new("transform", noop_handler()).with_dependency(a.clone()))
        .unwrap();
    let c = orch
        .add_task(TaskSpec::new("load", noop_handler()).with_dependency(b.clone()))
        .unwrap();

    let wf = orch.create_workflow("etl", HashMap::new()).unwrap();
    for id in [&a, &b, &c] {
        orch.add_task_to_workflow(&wf, id).unwrap();
    }

    let succeeded = orch.execute_workflow(&wf).await.unwrap();
    assert!(succeeded);
    assert_eq!(orch.workflow_status(&wf).unwrap(), WorkflowStatus::Completed);
    for id in [&a, &b, &c] {
        assert_eq!(orch.task_status(id).unwrap(), TaskStatus::Completed);
    }

    orch.shutdown().await;
}

#[tokio::test]
async fn workflow_fails_when_any_member_fails() {
    let orch = Orchestrator::new(fast_config());
    orch.start();

    let good = orch.add_task(TaskSpec::new("good", noop_handler())).unwrap();
    let bad = orch
        .add_task(TaskSpec::new(
            "bad",
            Handler::from_async_fn(|_args| async {
                Err(HandlerError::ExecutionFailed("broken".to_string()))
            }),
        ))
        .unwrap();

    let wf = orch.create_workflow("mixed", HashMap::new()).unwrap();
    orch.add_task_to_workflow(&wf, &good).unwrap();
    orch.add_task_to_workflow(&wf, &bad).unwrap();

    let succeeded = orch.execute_workflow(&wf).await.unwrap();
    assert!(!succeeded);
    assert_eq!(orch.workflow_status(&wf).unwrap(), WorkflowStatus::Failed);
    assert_eq!(orch.task_status(&good).unwrap(), TaskStatus::Completed);
    assert_eq!(orch.task_status(&bad).unwrap(), TaskStatus::Failed);

    orch.shutdown().await;
}

#[tokio::test]
async fn cancelled_member_does_not_fail_its_workflow() {
    let orch = Orchestrator::new(fast_config());

    // Cancel "a" before the workers come up so it never runs.
    let a = orch.add_task(TaskSpec::new("a", noop_handler())).unwrap();
    assert!(orch.cancel_task(&a));
    orch.start();

    let b = orch.add_task(TaskSpec::new("b", noop_handler())).unwrap();

    let wf = orch.create_workflow("partial", HashMap::new()).unwrap();
    orch.add_task_to_workflow(&wf, &a).unwrap();
    orch.add_task_to_workflow(&wf, &b).unwrap();

    // No member failed, so the workflow completes.
    let succeeded = orch.execute_workflow(&wf).await.unwrap();
    assert!(succeeded);
    assert_eq!(orch.workflow_status(&wf).unwrap(), WorkflowStatus::Completed);
    assert_eq!(orch.task_status(&a).unwrap(), TaskStatus::Cancelled);
    assert_eq!(orch.task_status(&b).unwrap(), TaskStatus::Completed);

    orch.shutdown().await;
}

#[tokio::test]
async fn cancelling_a_workflow_cancels_its_members() {
    // No workers: submitted tasks stay Pending so cancellation is
    // deterministic.
    let orch = Orchestrator::new(fast_config().with_max_workers(0));
    orch.start();

    let a = orch.add_task(TaskSpec::new("a", noop_handler())).unwrap();
    let b = orch.add_task(TaskSpec::new("b", noop_handler())).unwrap();

    let wf = orch.create_workflow("doomed", HashMap::new()).unwrap();
    orch.add_task_to_workflow(&wf, &a).unwrap();
    orch.add_task_to_workflow(&wf, &b).unwrap();

    assert!(orch.cancel_workflow(&wf));
    assert_eq!(orch.workflow_status(&wf).unwrap(), WorkflowStatus::Cancelled);
    assert_eq!(orch.task_status(&a).unwrap(), TaskStatus::Cancelled);
    assert_eq!(orch.task_status(&b).unwrap(), TaskStatus::Cancelled);

    // Already terminal; a second cancel reports nothing to do.
    assert!(!orch.cancel_workflow(&wf));

    orch.shutdown().await;
}

struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    async fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().await.iter().map(|e| e.kind()).collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) -> Result<(), EventError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

struct FailingHandler;

#[async_trait]
impl EventHandler for FailingHandler {
    async fn handle(&self, _event: &Event) -> Result<(), EventError> {
        Err(EventError::Failed("intentional".to_string()))
    }
}

#[tokio::test]
async fn lifecycle_events_are_emitted_in_order() {
    let orch = Orchestrator::new(fast_config());
    let recorder = Arc::new(RecordingHandler::new());
    orch.add_event_handler_all(recorder.clone()).await;
    orch.start();

    let id = orch
        .add_task(TaskSpec::new(
            "observed",
            Handler::from_async_fn(|_args| async { Ok(Value::Null) }),
        ))
        .unwrap();
    wait_for_status(&orch, &id, TaskStatus::Completed).await;
    // The completion event lands just after the status flips.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let kinds = recorder.kinds().await;
    assert_eq!(
        kinds,
        vec![EventKind::TaskStarted, EventKind::TaskCompleted]
    );

    orch.shutdown().await;
}

#[tokio::test]
async fn retry_events_carry_attempt_numbers() {
    let orch = Orchestrator::new(fast_config());
    let recorder = Arc::new(RecordingHandler::new());
    orch.add_event_handler(EventKind::TaskRetrying, recorder.clone())
        .await;
    orch.start();

    let id = orch
        .add_task(
            TaskSpec::new(
                "flaky",
                Handler::from_async_fn(|_args| async {
                    Err(HandlerError::ExecutionFailed("boom".to_string()))
                }),
            )
            .with_retry_policy(RetryPolicy::fixed(2, Duration::from_millis(5))),
        )
        .unwrap();
    wait_for_status(&orch, &id, TaskStatus::Failed).await;
    // Let the final event dispatch land.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let events = recorder.events.lock().await;
    let attempts: Vec<u32> = events
        .iter()
        .map(|e| match e {
            Event::TaskRetrying { attempt, .. } => *attempt,
            other => panic!("unexpected event: {other:?}"),
        })
        .collect();
    assert_eq!(attempts, vec![1, 2]);

    orch.shutdown().await;
}

#[tokio::test]
async fn failing_event_handler_does_not_disturb_execution() {
    let orch = Orchestrator::new(fast_config());
    let recorder = Arc::new(RecordingHandler::new());
    orch.add_event_handler_all(Arc::new(FailingHandler)).await;
    orch.add_event_handler_all(recorder.clone()).await;
    orch.start();

    let id = orch
        .add_task(TaskSpec::new("undisturbed", noop_handler()))
        .unwrap();

    assert_eq!(
        wait_for_status(&orch, &id, TaskStatus::Completed).await,
        TaskStatus::Completed
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    // The second handler still saw every event.
    assert_eq!(recorder.kinds().await.len(), 2);

    orch.shutdown().await;
}

#[tokio::test]
async fn purge_removes_only_old_terminal_records() {
    let orch = Orchestrator::new(fast_config());
    orch.start();

    let done = orch.add_task(TaskSpec::new("done", noop_handler())).unwrap();
    wait_for_status(&orch, &done, TaskStatus::Completed).await;

    // A task blocked on a dependency that never completes stays Pending.
    let blocked = orch
        .add_task(TaskSpec::new("blocked", noop_handler()).with_dependency("never_submitted"))
        .unwrap();

    // Nothing is old enough yet.
    assert_eq!(orch.purge_finished(Duration::from_secs(3600)).unwrap(), 0);

    // With a zero age the completed task goes; the pending one stays.
    let purged = orch.purge_finished(Duration::ZERO).unwrap();
    assert_eq!(purged, 1);
    assert!(orch.task_result(&done).is_err());
    assert_eq!(orch.task_status(&blocked).unwrap(), TaskStatus::Pending);

    orch.shutdown().await;
}

#[tokio::test]
async fn statistics_track_the_run() {
    let orch = Orchestrator::new(fast_config());
    orch.start();

    let a = orch.add_task(TaskSpec::new("a", noop_handler())).unwrap();
    wait_for_status(&orch, &a, TaskStatus::Completed).await;

    let stats = orch.statistics().unwrap();
    assert_eq!(stats.tasks_by_status.get(&TaskStatus::Completed), Some(&1));
    assert_eq!(stats.worker_pool.max_workers, 4);
    assert_eq!(stats.worker_pool.queued, 0);

    orch.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_accepting_background_work() {
    let orch = Orchestrator::new(fast_config());
    orch.start();

    let id = orch.add_task(TaskSpec::new("t", noop_handler())).unwrap();
    wait_for_status(&orch, &id, TaskStatus::Completed).await;

    orch.shutdown().await;

    // Submissions after shutdown are stored but never picked up.
    let late = orch.add_task(TaskSpec::new("late", noop_handler())).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(orch.task_status(&late).unwrap(), TaskStatus::Pending);
}
