use std::time::Duration;

use thiserror::Error;

/// Boxed error type produced by user tasks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a [`Context`](crate::Context) is done.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
  #[error("context cancelled")]
  Cancelled,

  #[error("context deadline exceeded")]
  DeadlineExceeded,
}

/// Reasons a pool refuses to accept a task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
  #[error("Pool is shutting down or already shut down, cannot accept new tasks")]
  PoolStopped,

  #[error("Submission context was done before the task could be enqueued: {0}")]
  Cancelled(ContextError),

  #[error("Timed out after {0:?} waiting for queue capacity")]
  TimedOut(Duration),
}

/// The error half of a task's result record.
#[derive(Error, Debug)]
pub enum TaskError {
  /// The task ran to completion and returned an error.
  #[error("Task failed: {0}")]
  Failed(#[source] BoxError),

  /// The task panicked. Carries the panic message when one could be recovered.
  #[error("Task panicked: {0}")]
  Panicked(String),
}

impl TaskError {
  pub fn is_panic(&self) -> bool {
    matches!(self, TaskError::Panicked(_))
  }

  /// Wraps any error a task returns.
  pub fn failed<E>(err: E) -> Self
  where
    E: Into<BoxError>,
  {
    TaskError::Failed(err.into())
  }
}

/// Lifecycle errors returned from `shutdown` and `wait`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
  #[error("Shutdown did not complete before its context was done: {0}")]
  ShutdownTimeout(ContextError),

  #[error("Wait was cancelled before the queue drained: {0}")]
  WaitCancelled(ContextError),
}
