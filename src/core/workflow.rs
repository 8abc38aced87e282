//! Workflow data model.
//!
//! A workflow is a named collection of tasks. Its terminal status is derived
//! from the aggregate terminal statuses of its members; it is never set
//! independently except via explicit cancellation.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{TaskId, WorkflowId};

/// Lifecycle status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Created, not yet executing.
    Pending,
    /// Member tasks are executing.
    Running,
    /// All members completed. Terminal.
    Completed,
    /// At least one member failed. Terminal.
    Failed,
    /// Explicitly cancelled. Terminal.
    Cancelled,
}

impl WorkflowStatus {
    /// Check if this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A workflow record owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct Workflow {
    /// Unique identifier.
    pub id: WorkflowId,
    /// Human-readable name.
    pub name: String,
    /// Member tasks, in the order they were added.
    pub task_ids: Vec<TaskId>,
    /// Current lifecycle status.
    pub status: WorkflowStatus,
    /// When the workflow was created.
    pub created_at: DateTime<Utc>,
    /// When execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the workflow reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Free-form metadata.
    pub metadata: HashMap<String, Value>,
}

impl Workflow {
    /// Create a new Pending workflow, generating a fresh id.
    pub fn new(name: impl Into<String>, metadata: HashMap<String, Value>) -> Self {
        Self {
            id: WorkflowId::generate(),
            name: name.into(),
            task_ids: Vec::new(),
            status: WorkflowStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata,
        }
    }

    /// Check if the workflow is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Add a member task.
    pub fn add_task(&mut self, task_id: TaskId) {
        self.task_ids.push(task_id);
    }

    /// Mark the workflow as running.
    pub fn mark_running(&mut self) {
        self.status = WorkflowStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark the workflow as completed.
    pub fn mark_completed(&mut self) {
        self.status = WorkflowStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the workflow as failed.
    pub fn mark_failed(&mut self) {
        self.status = WorkflowStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the workflow as cancelled.
    pub fn mark_cancelled(&mut self) {
        self.status = WorkflowStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }
}
