//! Worker pool.
//!
//! A fixed set of long-lived worker loops drains the work queue. Each loop
//! spawns the actual execution onto the runtime so a slow task never stalls
//! its worker's dequeue cadence. A global running-set caps concurrent
//! executions independently of the worker count.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::OrchestratorConfig;
use crate::core::types::TaskId;
use crate::engine::executor::TaskExecutor;
use crate::engine::queue::WorkQueue;

/// Join handles of in-flight task executions, keyed by task id.
///
/// Uses a std mutex: every critical section is short and never awaits.
pub struct RunningSet {
    inner: Mutex<HashMap<TaskId, JoinHandle<()>>>,
}

impl RunningSet {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Number of executions still in flight.
    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.values().filter(|h| !h.is_finished()).count(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Track a newly spawned execution. Finished entries are pruned on the
    /// way in so the map does not grow with completed handles.
    pub fn insert(&self, task_id: TaskId, handle: JoinHandle<()>) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.retain(|_, h| !h.is_finished());
            guard.insert(task_id, handle);
        }
    }

    /// Drop tracking for a finished execution.
    pub fn remove(&self, task_id: &TaskId) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.remove(task_id);
        }
    }

    /// Abort a single in-flight execution, if present.
    pub fn abort(&self, task_id: &TaskId) {
        if let Ok(mut guard) = self.inner.lock() {
            if let Some(handle) = guard.remove(task_id) {
                handle.abort();
            }
        }
    }

    /// Abort everything still in flight. Used by forced shutdown.
    pub fn abort_all(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            for (_, handle) in guard.drain() {
                handle.abort();
            }
        }
    }
}

impl Default for RunningSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns and supervises the worker loops.
pub struct WorkerPool {
    queue: Arc<WorkQueue>,
    executor: Arc<TaskExecutor>,
    running: Arc<RunningSet>,
    config: OrchestratorConfig,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<WorkQueue>,
        executor: Arc<TaskExecutor>,
        running: Arc<RunningSet>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            queue,
            executor,
            running,
            config,
        }
    }

    /// Spawn `max_workers` worker loops. Returns their join handles so
    /// shutdown can wait for them to drain.
    pub fn spawn_workers(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.config.max_workers)
            .map(|worker_id| {
                let queue = Arc::clone(&self.queue);
                let executor = Arc::clone(&self.executor);
                let running = Arc::clone(&self.running);
                let config = self.config.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(worker_loop(
                    worker_id, queue, executor, running, config, shutdown,
                ))
            })
            .collect()
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<WorkQueue>,
    executor: Arc<TaskExecutor>,
    running: Arc<RunningSet>,
    config: OrchestratorConfig,
    shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id = worker_id, "worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let Some(task_id) = queue.dequeue(config.dequeue_timeout).await else {
            continue;
        };

        // Concurrency cap. Put the task back and let another worker (or a
        // later pass) pick it up once a slot frees.
        if running.len() >= config.max_concurrent_tasks {
            if let Err(e) = queue.enqueue(task_id.clone()) {
                warn!(worker_id = worker_id, task = %task_id, error = %e,
                    "failed to re-enqueue task at concurrency cap");
            }
            tokio::time::sleep(config.saturation_backoff).await;
            continue;
        }

        let exec = Arc::clone(&executor);
        let set = Arc::clone(&running);
        let id = task_id.clone();
        let handle = tokio::spawn(async move {
            exec.execute(id.clone()).await;
            set.remove(&id);
        });
        running.insert(task_id, handle);
    }

    debug!(worker_id = worker_id, "worker stopped");
}
