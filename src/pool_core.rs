use crate::config::PoolConfig;
use crate::context::Context;
use crate::counters::{PoolStats, TaskCounters};
use crate::error::{ContextError, SubmitError};
use crate::intake::Intake;
use crate::lifecycle::Lifecycle;
use crate::task::ManagedTask;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State every pool is built from: configuration, lifecycle, the intake and
/// the counters.
#[derive(Debug)]
pub(crate) struct PoolCore<W> {
  pub(crate) config: PoolConfig,
  pub(crate) pool_name: Arc<String>,
  pub(crate) lifecycle: Arc<Lifecycle>,
  pub(crate) intake: Intake<W>,
  pub(crate) counters: Arc<TaskCounters>,
}

impl<W: Send + 'static> PoolCore<W> {
  pub(crate) fn new(config: PoolConfig) -> Self {
    let config = config.clamped();
    let pool_name = Arc::new(config.name.clone());
    Self {
      lifecycle: Arc::new(Lifecycle::new(pool_name.clone())),
      intake: Intake::new(config.queue_capacity),
      counters: Arc::new(TaskCounters::default()),
      pool_name,
      config,
    }
  }

  /// Reserves a `submitted` slot and enqueues `work`. The slot is released
  /// again if the intake refuses the task.
  pub(crate) async fn enqueue(
    &self,
    work: W,
    ctx: Option<&Context>,
    timeout: Option<Duration>,
  ) -> Result<(), SubmitError> {
    if self.lifecycle.is_stopped() {
      warn!(pool_name = %*self.pool_name, "Submit: Attempted to submit task to a pool that is shutting down or closed.");
      return Err(SubmitError::PoolStopped);
    }

    let slot = self.counters.reserve();
    let task = ManagedTask::new(work);
    let task_id = task.task_id;

    match self.intake.send(task, ctx, timeout).await {
      Ok(()) => {
        slot.commit();
        debug!(pool_name = %*self.pool_name, %task_id, queued = self.intake.len(), "Task submitted to intake.");
        Ok(())
      }
      Err(err) => {
        warn!(pool_name = %*self.pool_name, %task_id, error = %err, "Submit: Task refused.");
        Err(err)
      }
    }
  }

  /// Stops accepting work: closes the intake, then cancels the pool token.
  /// Returns `true` for the call that performed the transition.
  pub(crate) fn begin_stop(&self) -> bool {
    let first = self.lifecycle.begin_stop(|| {
      self.intake.close();
    });
    if first {
      info!(pool_name = %*self.pool_name, queued = self.intake.len(), "Pool shutdown initiated.");
      if !self.lifecycle.is_started() {
        // No worker will ever drain these.
        let discarded = self.intake.discard_queued();
        for _ in 0..discarded {
          self.counters.withdraw();
        }
        if discarded > 0 {
          warn!(pool_name = %*self.pool_name, discarded, "Pool stopped before it was started. Queued tasks discarded.");
        }
      }
    }
    first
  }

  pub(crate) async fn wait_workers(&self, ctx: Option<&Context>) -> Result<(), ContextError> {
    self.lifecycle.wait_workers(ctx).await
  }

  pub(crate) fn pool_token(&self) -> Option<CancellationToken> {
    self.lifecycle.token()
  }

  /// Counters first, then the intake depth, so a task dequeued mid-read is
  /// not counted as both queued and running.
  pub(crate) fn stats(&self) -> PoolStats {
    let stats = self.counters.snapshot(0);
    PoolStats {
      queued: self.intake.len(),
      ..stats
    }
  }
}

/// Stops a context-bound pool on its own once the context given to `start`
/// is done, even if `shutdown` is never called. Returns when the pool token is
/// cancelled by either path.
pub(crate) async fn watch_pool_lifetime<W: Send + 'static>(
  pool_name: Arc<String>,
  base: Context,
  pool_token: CancellationToken,
  lifecycle: Arc<Lifecycle>,
  intake: Intake<W>,
) {
  tokio::select! {
    _ = pool_token.cancelled() => {}
    err = base.done() => {
      info!(pool_name = %*pool_name, reason = %err, "Start context is done. Stopping pool.");
    }
  }
  if lifecycle.begin_stop(|| {
    intake.close();
  }) {
    info!(pool_name = %*pool_name, "Pool stopped by its start context.");
  }
}
