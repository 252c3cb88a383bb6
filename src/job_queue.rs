use crate::config::PoolConfig;
use crate::context::Context;
use crate::counters::{PoolStats, TaskCounters};
use crate::error::{PoolError, SubmitError};
use crate::intake::Intake;
use crate::pool_core::{watch_pool_lifetime, PoolCore};
use crate::task::{boxed_job, run_context_task, ContextTaskFn};

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

type Job = ContextTaskFn<()>;

/// A context-aware, fire-and-forget job runner.
///
/// Jobs produce no result; a panicking job is logged and counted. [`wait`]
/// blocks until every job accepted so far has finished.
///
/// [`wait`]: Self::wait
pub struct JobQueue {
  core: PoolCore<Job>,
}

impl fmt::Debug for JobQueue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("JobQueue")
      .field("name", &self.core.pool_name)
      .field("stats", &self.stats())
      .field("stopped", &self.is_stopped())
      .finish_non_exhaustive()
  }
}

impl JobQueue {
  pub fn new(workers: usize, queue_capacity: usize) -> Self {
    Self::with_config(PoolConfig::new(workers, queue_capacity).name("job_queue"))
  }

  pub fn with_config(config: PoolConfig) -> Self {
    Self {
      core: PoolCore::new(config),
    }
  }

  /// Spawns the workers. Returns `false` if the queue was already started or
  /// stopped.
  pub fn start(&self, ctx: &Context) -> bool {
    let queue_token = ctx.token().child_token();
    let workers = self.core.config.workers;

    self.core.lifecycle.start_with(queue_token, |tracker, queue_token| {
      for worker_id in 0..workers {
        tracker.spawn(
          run_worker(
            self.core.pool_name.clone(),
            worker_id,
            self.core.intake.consumer(),
            self.core.counters.clone(),
            queue_token.clone(),
          )
          .instrument(info_span!("job_queue_worker", name = %*self.core.pool_name, worker_id)),
        );
      }
      tokio::spawn(watch_pool_lifetime(
        self.core.pool_name.clone(),
        ctx.clone(),
        queue_token.clone(),
        self.core.lifecycle.clone(),
        self.core.intake.consumer(),
      ));
    })
  }

  pub async fn submit<F, Fut>(&self, ctx: &Context, job: F) -> Result<(), SubmitError>
  where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self.core.enqueue(boxed_job(job), Some(ctx), None).await
  }

  pub async fn submit_timeout<F, Fut>(&self, ctx: &Context, timeout: Duration, job: F) -> Result<(), SubmitError>
  where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self.core.enqueue(boxed_job(job), Some(ctx), Some(timeout)).await
  }

  /// Blocks until every accepted job has finished, or fails with
  /// [`PoolError::WaitCancelled`] once `ctx` is done.
  ///
  /// Jobs whose `submit` completed before this call are always awaited; jobs
  /// submitted concurrently may or may not be. Any number of callers may wait
  /// at the same time.
  pub async fn wait(&self, ctx: &Context) -> Result<(), PoolError> {
    trace!(pool_name = %*self.core.pool_name, outstanding = self.outstanding(), "Waiting for the queue to drain.");
    self
      .core
      .counters
      .wait_until(ctx, |counters| counters.submitted() == counters.finished())
      .await
      .map_err(|err| {
        warn!(
          pool_name = %*self.core.pool_name,
          outstanding = self.outstanding(),
          "Wait cancelled before the queue drained: {}", err
        );
        PoolError::WaitCancelled(err)
      })
  }

  /// Stops accepting jobs, cancels the queue token and waits for the workers
  /// to drain the intake and return.
  pub async fn shutdown(&self, ctx: &Context) -> Result<(), PoolError> {
    if !self.core.begin_stop() {
      debug!(pool_name = %*self.core.pool_name, "Shutdown already in progress or completed.");
    }

    match self.core.wait_workers(Some(ctx)).await {
      Ok(()) => {
        info!(pool_name = %*self.core.pool_name, "All workers finished. Job queue shut down.");
        Ok(())
      }
      Err(err) => {
        warn!(
          pool_name = %*self.core.pool_name,
          running = self.running(),
          queued = self.tasks_in_queue(),
          "Shutdown context done before workers finished: {}", err
        );
        Err(PoolError::ShutdownTimeout(err))
      }
    }
  }

  /// Accepted jobs that have not finished yet.
  pub fn outstanding(&self) -> u64 {
    self.submitted().saturating_sub(self.finished())
  }

  pub fn name(&self) -> &str {
    &self.core.pool_name
  }

  pub fn worker_count(&self) -> usize {
    self.core.config.workers
  }

  pub fn queue_capacity(&self) -> usize {
    self.core.config.queue_capacity
  }

  pub fn is_started(&self) -> bool {
    self.core.lifecycle.is_started()
  }

  pub fn is_stopped(&self) -> bool {
    self.core.lifecycle.is_stopped()
  }

  pub fn queue_token(&self) -> Option<CancellationToken> {
    self.core.pool_token()
  }

  pub fn tasks_in_queue(&self) -> usize {
    self.core.intake.len()
  }

  pub fn submitted(&self) -> u64 {
    self.core.counters.submitted()
  }

  pub fn running(&self) -> u64 {
    self.core.counters.running()
  }

  pub fn finished(&self) -> u64 {
    self.core.counters.finished()
  }

  pub fn total_submitted(&self) -> u64 {
    self.core.counters.total_submitted()
  }

  pub fn panicked(&self) -> u64 {
    self.core.counters.panicked()
  }

  pub fn stats(&self) -> PoolStats {
    self.core.stats()
  }
}

impl Drop for JobQueue {
  fn drop(&mut self) {
    if self.core.begin_stop() {
      info!(pool_name = %*self.core.pool_name, "JobQueue dropped without shutdown. Workers will drain and exit.");
    }
  }
}

async fn run_worker(
  pool_name: Arc<String>,
  worker_id: usize,
  intake: Intake<Job>,
  counters: Arc<TaskCounters>,
  queue_token: CancellationToken,
) {
  info!(name = %*pool_name, worker_id, "Worker started.");

  while let Some(task) = intake.recv().await {
    let task_id = task.task_id;
    let running = counters.begin_task();
    if let Err(message) = run_context_task(task.work, queue_token.clone()).await {
      counters.record_panic();
      error!(name = %*pool_name, worker_id, %task_id, panic = %message, "Job panicked during execution.");
    }
    drop(running);
    trace!(name = %*pool_name, worker_id, %task_id, "Job finished.");
  }

  info!(name = %*pool_name, worker_id, "Worker stopped: intake closed and drained.");
}
