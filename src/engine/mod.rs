//! Execution engine: work queue, dependency resolver, executor, worker pool.

pub mod executor;
pub mod pool;
pub mod queue;
pub mod resolver;
