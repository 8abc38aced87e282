//! Orchestrator facade.
//!
//! Owns the stores, the work queue, the dependency resolver, the worker
//! pool, and the event bus, and exposes the public task/workflow API on top
//! of them. Every collaborator is constructed and wired here; nothing is
//! global, so independent orchestrators can coexist in one process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::core::graph::GraphError;
use crate::core::task::{Task, TaskResult, TaskSpec, TaskStatus};
use crate::core::types::{TaskId, WorkflowId};
use crate::core::workflow::{Workflow, WorkflowStatus};
use crate::engine::executor::TaskExecutor;
use crate::engine::pool::{RunningSet, WorkerPool};
use crate::engine::queue::{QueueError, WorkQueue};
use crate::engine::resolver::DependencyResolver;
use crate::events::{Event, EventBus, EventHandler, EventKind};
use crate::store::{StoreError, TaskStore, WorkflowStore};

/// Errors surfaced by the orchestrator API.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No task with the given id exists.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// No workflow with the given id exists.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    /// The task has not reached a terminal status yet.
    #[error("no result available for task: {0}")]
    ResultNotReady(TaskId),

    /// Submitting the task would close a dependency cycle.
    #[error(transparent)]
    Cycle(#[from] GraphError),

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Underlying queue failure.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Worker-pool portion of [`Statistics`].
#[derive(Debug, Clone, Serialize)]
pub struct WorkerPoolInfo {
    pub max_workers: usize,
    pub max_concurrent_tasks: usize,
    /// Executions currently in flight.
    pub running: usize,
    /// Tasks waiting in the work queue.
    pub queued: usize,
}

/// Point-in-time snapshot of orchestrator state.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub tasks_by_status: HashMap<TaskStatus, usize>,
    pub workflows_by_status: HashMap<WorkflowStatus, usize>,
    pub worker_pool: WorkerPoolInfo,
}

/// The orchestration engine.
pub struct Orchestrator {
    config: OrchestratorConfig,
    tasks: Arc<TaskStore>,
    workflows: Arc<WorkflowStore>,
    queue: Arc<WorkQueue>,
    events: Arc<EventBus>,
    resolver: Arc<DependencyResolver>,
    running: Arc<RunningSet>,
    pool: WorkerPool,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Orchestrator {
    /// Build an orchestrator with the given configuration. Call
    /// [`start`](Self::start) to spawn the background machinery.
    pub fn new(config: OrchestratorConfig) -> Self {
        let tasks = Arc::new(TaskStore::new());
        let workflows = Arc::new(WorkflowStore::new());
        let queue = Arc::new(WorkQueue::new());
        let events = Arc::new(EventBus::new());
        let running = Arc::new(RunningSet::new());
        let resolver = Arc::new(DependencyResolver::new(
            Arc::clone(&tasks),
            Arc::clone(&queue),
        ));
        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&tasks),
            Arc::clone(&queue),
            Arc::clone(&events),
        ));
        let pool = WorkerPool::new(
            Arc::clone(&queue),
            executor,
            Arc::clone(&running),
            config.clone(),
        );
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            tasks,
            workflows,
            queue,
            events,
            resolver,
            running,
            pool,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the worker pool and the background dependency sweep.
    /// Idempotent; calling twice is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown_tx.send_replace(false);

        let shutdown_rx = self.shutdown_tx.subscribe();
        let mut spawned = self.pool.spawn_workers(shutdown_rx.clone());
        spawned.push(tokio::spawn(Arc::clone(&self.resolver).run(
            self.config.resolver_interval,
            shutdown_rx,
        )));

        if let Ok(mut handles) = self.handles.lock() {
            handles.extend(spawned);
        }
        info!(
            max_workers = self.config.max_workers,
            max_concurrent_tasks = self.config.max_concurrent_tasks,
            "orchestrator started"
        );
    }

    /// Submit a task for execution.
    ///
    /// Rejects submissions whose dependencies would close a cycle. The task
    /// is enqueued as soon as its dependencies (if any) are Completed.
    pub fn add_task(&self, spec: TaskSpec) -> Result<TaskId, OrchestratorError> {
        let task = Task::from_spec(spec);
        let id = task.id.clone();

        self.tasks.insert_acyclic(task).map_err(|e| match e {
            StoreError::Cycle(cycle) => OrchestratorError::Cycle(cycle),
            other => OrchestratorError::Store(other),
        })?;
        debug!(task = %id, "task submitted");
        self.resolver.resolve_once();
        Ok(id)
    }

    /// Create an empty workflow.
    pub fn create_workflow(
        &self,
        name: impl Into<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<WorkflowId, OrchestratorError> {
        let workflow = Workflow::new(name, metadata);
        let id = workflow.id.clone();
        self.workflows.insert(workflow)?;
        debug!(workflow = %id, "workflow created");
        Ok(id)
    }

    /// Attach an existing task to a workflow.
    pub fn add_task_to_workflow(
        &self,
        workflow_id: &WorkflowId,
        task_id: &TaskId,
    ) -> Result<(), OrchestratorError> {
        if !self.tasks.contains(task_id)? {
            return Err(OrchestratorError::TaskNotFound(task_id.clone()));
        }
        self.workflows
            .update(workflow_id, |w| w.add_task(task_id.clone()))
            .map_err(|e| workflow_err(workflow_id, e))
    }

    /// Execute a workflow and wait for it to reach a terminal status.
    ///
    /// Returns `Ok(true)` iff the workflow Completed. A workflow already
    /// terminal returns its outcome without re-executing.
    pub async fn execute_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<bool, OrchestratorError> {
        let workflow = self
            .workflows
            .get(workflow_id)
            .map_err(|e| workflow_err(workflow_id, e))?;

        if workflow.is_terminal() {
            return Ok(workflow.status == WorkflowStatus::Completed);
        }

        let start = std::time::Instant::now();
        self.workflows
            .update(workflow_id, |w| w.mark_running())
            .map_err(|e| workflow_err(workflow_id, e))?;
        self.events
            .emit(Event::workflow_started(workflow_id.clone()))
            .await;
        self.resolver.resolve_once();

        loop {
            let workflow = self
                .workflows
                .get(workflow_id)
                .map_err(|e| workflow_err(workflow_id, e))?;

            // Cancellation from another caller wins.
            if workflow.status == WorkflowStatus::Cancelled {
                return Ok(false);
            }

            let known: HashMap<TaskId, TaskStatus> = self
                .tasks
                .statuses_of(&workflow.task_ids)?
                .into_iter()
                .collect();

            // A member id with no record (purged or never submitted) cannot
            // make progress; treat it as terminal.
            let all_terminal = workflow
                .task_ids
                .iter()
                .all(|id| known.get(id).map(|s| s.is_terminal()).unwrap_or(true));

            if all_terminal {
                // The workflow fails only on failed members; cancelled or
                // missing members do not fail it on their own.
                let failed: Vec<TaskId> = workflow
                    .task_ids
                    .iter()
                    .filter(|id| known.get(*id) == Some(&TaskStatus::Failed))
                    .cloned()
                    .collect();

                let finished = self
                    .workflows
                    .update(workflow_id, |w| {
                        if w.status != WorkflowStatus::Running {
                            return false;
                        }
                        if failed.is_empty() {
                            w.mark_completed();
                        } else {
                            w.mark_failed();
                        }
                        true
                    })
                    .map_err(|e| workflow_err(workflow_id, e))?;

                if !finished {
                    // Raced with cancellation.
                    return Ok(false);
                }

                if failed.is_empty() {
                    debug!(workflow = %workflow_id, "workflow completed");
                    self.events
                        .emit(Event::workflow_completed(
                            workflow_id.clone(),
                            start.elapsed(),
                        ))
                        .await;
                    return Ok(true);
                }
                warn!(
                    workflow = %workflow_id,
                    failed = failed.len(),
                    "workflow failed"
                );
                self.events
                    .emit(Event::workflow_failed(workflow_id.clone(), failed))
                    .await;
                return Ok(false);
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Current status of a task.
    pub fn task_status(&self, task_id: &TaskId) -> Result<TaskStatus, OrchestratorError> {
        self.tasks.status(task_id).map_err(|e| task_err(task_id, e))
    }

    /// Current status of a workflow.
    pub fn workflow_status(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<WorkflowStatus, OrchestratorError> {
        self.workflows
            .status(workflow_id)
            .map_err(|e| workflow_err(workflow_id, e))
    }

    /// Result of a terminal task.
    pub fn task_result(&self, task_id: &TaskId) -> Result<TaskResult, OrchestratorError> {
        let task = self.tasks.get(task_id).map_err(|e| task_err(task_id, e))?;
        task.result
            .ok_or_else(|| OrchestratorError::ResultNotReady(task_id.clone()))
    }

    /// Cancel a task. Returns true if the task existed and was not already
    /// terminal. An in-flight execution is aborted.
    pub fn cancel_task(&self, task_id: &TaskId) -> bool {
        let cancelled = self
            .tasks
            .update(task_id, |t| {
                if t.is_terminal() {
                    false
                } else {
                    t.mark_cancelled();
                    true
                }
            })
            .unwrap_or(false);

        if cancelled {
            self.running.abort(task_id);
            debug!(task = %task_id, "task cancelled");
        }
        cancelled
    }

    /// Cancel a workflow and all of its non-terminal member tasks. Returns
    /// true if the workflow existed and was not already terminal.
    pub fn cancel_workflow(&self, workflow_id: &WorkflowId) -> bool {
        let members = match self.workflows.update(workflow_id, |w| {
            if w.is_terminal() {
                None
            } else {
                w.mark_cancelled();
                Some(w.task_ids.clone())
            }
        }) {
            Ok(Some(members)) => members,
            _ => return false,
        };

        for task_id in &members {
            self.cancel_task(task_id);
        }
        debug!(workflow = %workflow_id, members = members.len(), "workflow cancelled");
        true
    }

    /// Register an event handler for a single event kind.
    pub async fn add_event_handler(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.events.register_filtered(kind, handler).await;
    }

    /// Register an event handler for all events.
    pub async fn add_event_handler_all(&self, handler: Arc<dyn EventHandler>) {
        self.events.register(handler).await;
    }

    /// Snapshot of task/workflow counts and worker-pool occupancy.
    pub fn statistics(&self) -> Result<Statistics, OrchestratorError> {
        Ok(Statistics {
            tasks_by_status: self.tasks.counts_by_status()?,
            workflows_by_status: self.workflows.counts_by_status()?,
            worker_pool: WorkerPoolInfo {
                max_workers: self.config.max_workers,
                max_concurrent_tasks: self.config.max_concurrent_tasks,
                running: self.running.len(),
                queued: self.queue.len(),
            },
        })
    }

    /// Remove terminal tasks and workflows that finished more than
    /// `older_than` ago. Returns the number of records removed.
    pub fn purge_finished(&self, older_than: Duration) -> Result<usize, OrchestratorError> {
        let age = chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now() - age;

        let purged = self.tasks.purge_terminal_before(cutoff)?
            + self.workflows.purge_terminal_before(cutoff)?;
        if purged > 0 {
            debug!(purged = purged, "purged finished records");
        }
        Ok(purged)
    }

    /// Stop the background machinery, waiting up to the configured shutdown
    /// timeout for in-flight tasks before aborting them.
    pub async fn shutdown(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        while !self.running.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(self.config.poll_interval).await;
        }
        self.running.abort_all();

        let handles: Vec<JoinHandle<()>> = match self.handles.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                warn!("worker did not stop before the shutdown deadline");
            }
        }
        info!("orchestrator stopped");
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

fn task_err(id: &TaskId, e: StoreError) -> OrchestratorError {
    match e {
        StoreError::NotFound(_) => OrchestratorError::TaskNotFound(id.clone()),
        other => other.into(),
    }
}

fn workflow_err(id: &WorkflowId, e: StoreError) -> OrchestratorError {
    match e {
        StoreError::NotFound(_) => OrchestratorError::WorkflowNotFound(id.clone()),
        other => other.into(),
    }
}
