//! Work queue of ready tasks.
//!
//! An unbounded FIFO. Workers dequeue with a timeout so they can observe the
//! shutdown flag while idle. Task priority is not consulted for ordering;
//! the only ordering contract is FIFO by enqueue time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::core::types::TaskId;

/// Errors that can occur on the work queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue has been closed.
    #[error("work queue closed")]
    Closed,
}

/// Unbounded FIFO of ready task ids.
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<TaskId>,
    rx: Mutex<mpsc::UnboundedReceiver<TaskId>>,
    depth: AtomicUsize,
}

impl WorkQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            depth: AtomicUsize::new(0),
        }
    }

    /// Enqueue a ready task.
    pub fn enqueue(&self, task_id: TaskId) -> Result<(), QueueError> {
        self.tx.send(task_id).map_err(|_| QueueError::Closed)?;
        self.depth.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Dequeue the next ready task, waiting up to `timeout`.
    ///
    /// Returns `None` on timeout or if the queue is closed. The receiver
    /// lock is held only for the duration of this call, so multiple workers
    /// take turns draining the queue.
    pub async fn dequeue(&self, timeout: Duration) -> Option<TaskId> {
        let result = tokio::time::timeout(timeout, async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        })
        .await;

        match result {
            Ok(Some(task_id)) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                Some(task_id)
            }
            _ => None,
        }
    }

    /// Number of tasks currently waiting in the queue.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
