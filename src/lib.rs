pub mod config;
pub mod core;
pub mod engine;
pub mod events;
pub mod orchestrator;
pub mod store;

pub use crate::config::OrchestratorConfig;
pub use crate::core::graph::GraphError;
pub use crate::core::retry::{
    Backoff, ExponentialBackoff, FixedBackoff, RetryCondition, RetryPolicy,
};
pub use crate::core::task::{
    AsyncHandler, BlockingHandler, Handler, HandlerError, Priority, TaskArgs, TaskResult,
    TaskSpec, TaskStatus,
};
pub use crate::core::types::{TaskId, WorkflowId};
pub use crate::core::workflow::WorkflowStatus;
pub use crate::events::{Event, EventError, EventHandler, EventKind};
pub use crate::orchestrator::{Orchestrator, OrchestratorError, Statistics, WorkerPoolInfo};
pub use crate::store::StoreError;
