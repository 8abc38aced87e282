//! Core data model: identifiers, tasks, workflows, retry policies, and
//! dependency-graph validation.

pub mod graph;
pub mod retry;
pub mod task;
pub mod types;
pub mod workflow;
