//! In-memory stores for task and workflow records.
//!
//! The stores are the single source of truth for lifecycle status. They are
//! touched concurrently by workers, the dependency resolver, workflow
//! polling, and external callers, so every operation takes the lock for the
//! whole read-modify-write.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::graph::{self, GraphError};
use crate::core::task::{Task, TaskStatus};
use crate::core::types::{TaskId, WorkflowId};
use crate::core::workflow::{Workflow, WorkflowStatus};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Inserting the record would close a dependency cycle.
    #[error(transparent)]
    Cycle(#[from] GraphError),

    /// Store lock was poisoned.
    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Thread-safe in-memory collection of task records.
pub struct TaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl TaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a new task record.
    pub fn insert(&self, task: Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| StoreError::LockPoisoned)?;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::DuplicateKey(format!("task: {}", task.id)));
        }
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Get a clone of a task record.
    pub fn get(&self, id: &TaskId) -> Result<Task, StoreError> {
        let tasks = self.tasks.read().map_err(|_| StoreError::LockPoisoned)?;
        tasks
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("task: {id}")))
    }

    /// Check whether a task exists.
    pub fn contains(&self, id: &TaskId) -> Result<bool, StoreError> {
        let tasks = self.tasks.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tasks.contains_key(id))
    }

    /// Get a task's current status.
    pub fn status(&self, id: &TaskId) -> Result<TaskStatus, StoreError> {
        let tasks = self.tasks.read().map_err(|_| StoreError::LockPoisoned)?;
        tasks
            .get(id)
            .map(|t| t.status)
            .ok_or_else(|| StoreError::NotFound(format!("task: {id}")))
    }

    /// Apply a mutation to a task under the write lock, returning the
    /// closure's value.
    pub fn update<R>(
        &self,
        id: &TaskId,
        f: impl FnOnce(&mut Task) -> R,
    ) -> Result<R, StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| StoreError::LockPoisoned)?;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("task: {id}")))?;
        Ok(f(task))
    }

    /// List tasks currently in the given status.
    pub fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut result: Vec<_> = tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    /// Count tasks grouped by status.
    pub fn counts_by_status(&self) -> Result<HashMap<TaskStatus, usize>, StoreError> {
        let tasks = self.tasks.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut counts = HashMap::new();
        for task in tasks.values() {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Statuses for a set of tasks, in the given order. Ids with no record
    /// are skipped.
    pub fn statuses_of(&self, ids: &[TaskId]) -> Result<Vec<(TaskId, TaskStatus)>, StoreError> {
        let tasks = self.tasks.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(ids
            .iter()
            .filter_map(|id| tasks.get(id).map(|t| (id.clone(), t.status)))
            .collect())
    }

    /// Atomically claim every Pending task whose dependencies are all
    /// Completed and that is not already queued.
    ///
    /// The queued flag is flipped under the same write lock that reads the
    /// dependency statuses, so each Pending-to-ready transition is claimed
    /// exactly once. A dependency id with no record keeps its dependent
    /// Pending.
    pub fn claim_ready(&self) -> Result<Vec<TaskId>, StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| StoreError::LockPoisoned)?;

        let mut ready: Vec<TaskId> = tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && !t.queued
                    && t.dependencies.iter().all(|dep| {
                        tasks
                            .get(dep)
                            .map(|d| d.status == TaskStatus::Completed)
                            .unwrap_or(false)
                    })
            })
            .map(|t| t.id.clone())
            .collect();

        // Stable submission order keeps the queue FIFO by creation time.
        ready.sort_by_key(|id| tasks.get(id).map(|t| t.created_at));

        for id in &ready {
            if let Some(task) = tasks.get_mut(id) {
                task.queued = true;
            }
        }

        Ok(ready)
    }

    /// Insert a new task record, validating under the same write lock that
    /// its dependency edges do not close a cycle with the stored tasks.
    ///
    /// Holding the lock across both the check and the insert is what keeps
    /// two concurrent submissions with complementary dependencies from both
    /// passing the check.
    pub fn insert_acyclic(&self, task: Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| StoreError::LockPoisoned)?;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::DuplicateKey(format!("task: {}", task.id)));
        }

        let mut edges: HashMap<TaskId, Vec<TaskId>> = tasks
            .values()
            .map(|t| (t.id.clone(), t.dependencies.clone()))
            .collect();
        edges.insert(task.id.clone(), task.dependencies.clone());
        graph::check_acyclic(&edges)?;

        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Remove terminal tasks that finished before the cutoff. Returns the
    /// number of records removed.
    pub fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| StoreError::LockPoisoned)?;
        let before = tasks.len();
        tasks.retain(|_, t| {
            !(t.is_terminal() && t.completed_at.map(|at| at < cutoff).unwrap_or(false))
        });
        Ok(before - tasks.len())
    }

    /// Number of stored tasks.
    pub fn len(&self) -> Result<usize, StoreError> {
        let tasks = self.tasks.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tasks.len())
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe in-memory collection of workflow records.
pub struct WorkflowStore {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
}

impl WorkflowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a new workflow record.
    pub fn insert(&self, workflow: Workflow) -> Result<(), StoreError> {
        let mut workflows = self
            .workflows
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        if workflows.contains_key(&workflow.id) {
            return Err(StoreError::DuplicateKey(format!(
                "workflow: {}",
                workflow.id
            )));
        }
        workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    /// Get a clone of a workflow record.
    pub fn get(&self, id: &WorkflowId) -> Result<Workflow, StoreError> {
        let workflows = self
            .workflows
            .read()
            .map_err(|_| StoreError::LockPoisoned)?;
        workflows
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("workflow: {id}")))
    }

    /// Get a workflow's current status.
    pub fn status(&self, id: &WorkflowId) -> Result<WorkflowStatus, StoreError> {
        let workflows = self
            .workflows
            .read()
            .map_err(|_| StoreError::LockPoisoned)?;
        workflows
            .get(id)
            .map(|w| w.status)
            .ok_or_else(|| StoreError::NotFound(format!("workflow: {id}")))
    }

    /// Apply a mutation to a workflow under the write lock.
    pub fn update<R>(
        &self,
        id: &WorkflowId,
        f: impl FnOnce(&mut Workflow) -> R,
    ) -> Result<R, StoreError> {
        let mut workflows = self
            .workflows
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        let workflow = workflows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("workflow: {id}")))?;
        Ok(f(workflow))
    }

    /// Count workflows grouped by status.
    pub fn counts_by_status(&self) -> Result<HashMap<WorkflowStatus, usize>, StoreError> {
        let workflows = self
            .workflows
            .read()
            .map_err(|_| StoreError::LockPoisoned)?;
        let mut counts = HashMap::new();
        for wf in workflows.values() {
            *counts.entry(wf.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Remove terminal workflows that finished before the cutoff.
    pub fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut workflows = self
            .workflows
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        let before = workflows.len();
        workflows.retain(|_, w| {
            !(w.is_terminal() && w.completed_at.map(|at| at < cutoff).unwrap_or(false))
        });
        Ok(before - workflows.len())
    }
}

impl Default for WorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}
