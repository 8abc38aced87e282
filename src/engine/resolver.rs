//! Dependency resolution.
//!
//! Decides which Pending tasks are ready to run. Triggered eagerly on task
//! submission and workflow start, and periodically as a background sweep
//! that re-checks all Pending tasks. Each Pending-to-ready transition
//! enqueues the task exactly once.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::engine::queue::WorkQueue;
use crate::store::TaskStore;

/// Moves Pending tasks whose dependencies are all Completed onto the work
/// queue.
pub struct DependencyResolver {
    tasks: Arc<TaskStore>,
    queue: Arc<WorkQueue>,
}

impl DependencyResolver {
    /// Create a resolver over the given store and queue.
    pub fn new(tasks: Arc<TaskStore>, queue: Arc<WorkQueue>) -> Self {
        Self { tasks, queue }
    }

    /// Run one resolution pass: claim every ready task and enqueue it.
    ///
    /// Returns the number of tasks enqueued.
    pub fn resolve_once(&self) -> usize {
        let ready = match self.tasks.claim_ready() {
            Ok(ready) => ready,
            Err(e) => {
                warn!(error = %e, "dependency sweep failed to read task store");
                return 0;
            }
        };

        let mut enqueued = 0;
        for task_id in ready {
            match self.queue.enqueue(task_id.clone()) {
                Ok(()) => enqueued += 1,
                Err(e) => {
                    // Queue closed during shutdown; release the claim so the
                    // task is not stranded as queued-but-nowhere.
                    warn!(task_id = %task_id, error = %e, "failed to enqueue ready task");
                    let _ = self.tasks.update(&task_id, |t| t.queued = false);
                }
            }
        }
        enqueued
    }

    /// Background sweep loop. Re-checks all Pending tasks every `interval`
    /// until the shutdown flag flips.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let enqueued = self.resolve_once();
                    if enqueued > 0 {
                        debug!(enqueued = enqueued, "dependency sweep enqueued ready tasks");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("dependency resolver shutting down");
                        break;
                    }
                }
            }
        }
    }
}
