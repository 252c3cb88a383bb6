//! Tokio-based bounded worker pools and a fire-and-forget job queue.
//!
//! Three independent executors share one counter model (`submitted`,
//! `running`, `finished`) and the same bounded-intake backpressure:
//!
//! * [`ContextPool`] runs context-aware fallible tasks and buffers a typed
//!   result record per task; `shutdown` drains submitted work.
//! * [`JobQueue`] runs context-aware jobs without results; `wait` blocks until
//!   every accepted job has finished.
//! * [`SimplePool`] runs context-less fallible tasks with snapshot and
//!   drain-all result collection.
//!
//! Panics inside tasks are caught and surfaced as [`TaskError::Panicked`] (or
//! logged, for jobs). All pools log through `tracing`.

mod config;
mod context;
mod context_pool;
mod counters;
mod error;
mod intake;
mod job_queue;
mod lifecycle;
mod pool_core;
mod results;
mod simple_pool;
mod task;

pub use config::{PoolConfig, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
pub use context::Context;
pub use context_pool::ContextPool;
pub use counters::PoolStats;
pub use error::{BoxError, ContextError, PoolError, SubmitError, TaskError};
pub use job_queue::JobQueue;
pub use simple_pool::SimplePool;
pub use task::{TaskFuture, TaskResult};
