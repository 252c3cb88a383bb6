use crate::config::PoolConfig;
use crate::context::Context;
use crate::counters::{PoolStats, TaskCounters};
use crate::error::{BoxError, PoolError, SubmitError, TaskError};
use crate::intake::Intake;
use crate::pool_core::{watch_pool_lifetime, PoolCore};
use crate::results::{ResultBuffer, ResultPublisher};
use crate::task::{boxed_context_task, run_context_task, ContextTaskFn, TaskResult};

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

type ContextWork<T> = ContextTaskFn<TaskResult<T>>;

/// A context-aware worker pool that returns a typed result record per task.
///
/// Tasks receive the pool's cancellation token, derived from the context given
/// to [`start`](Self::start) and cancelled by [`shutdown`](Self::shutdown).
/// Results are buffered in completion order and read back with
/// [`next_result`](Self::next_result), [`fetch_results`](Self::fetch_results)
/// or [`try_drain_results`](Self::try_drain_results).
pub struct ContextPool<T: Send + 'static> {
  core: PoolCore<ContextWork<T>>,
  results: ResultBuffer<T>,
}

impl<T: Send + 'static> fmt::Debug for ContextPool<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ContextPool")
      .field("name", &self.core.pool_name)
      .field("stats", &self.stats())
      .field("stopped", &self.is_stopped())
      .finish_non_exhaustive()
  }
}

impl<T: Send + 'static> ContextPool<T> {
  /// Creates a pool with `workers` workers and an intake of `queue_capacity`
  /// tasks. Zero values fall back to the library defaults.
  pub fn new(workers: usize, queue_capacity: usize) -> Self {
    Self::with_config(PoolConfig::new(workers, queue_capacity).name("context_pool"))
  }

  pub fn with_config(config: PoolConfig) -> Self {
    let core = PoolCore::new(config);
    let results = ResultBuffer::new(
      core.pool_name.clone(),
      core.config.queue_capacity + core.config.workers,
      core.counters.clone(),
    );
    Self { core, results }
  }

  /// Spawns the workers. The pool stays alive until `shutdown` or until `ctx`
  /// is done. Must be called from within a Tokio runtime.
  ///
  /// Returns `false` if the pool was already started or stopped.
  pub fn start(&self, ctx: &Context) -> bool {
    let pool_token = ctx.token().child_token();
    let workers = self.core.config.workers;

    self.core.lifecycle.start_with(pool_token, |tracker, pool_token| {
      let Some(publisher) = self.results.take_publisher(pool_token.clone()) else {
        return;
      };
      for worker_id in 0..workers {
        tracker.spawn(
          run_worker(
            self.core.pool_name.clone(),
            worker_id,
            self.core.intake.consumer(),
            publisher.clone(),
            self.core.counters.clone(),
            pool_token.clone(),
          )
          .instrument(info_span!("context_pool_worker", name = %*self.core.pool_name, worker_id)),
        );
      }
      tokio::spawn(watch_pool_lifetime(
        self.core.pool_name.clone(),
        ctx.clone(),
        pool_token.clone(),
        self.core.lifecycle.clone(),
        self.core.intake.consumer(),
      ));
    })
  }

  /// Submits a task, waiting for intake capacity as long as `ctx` allows.
  pub async fn submit<F, Fut, E>(&self, ctx: &Context, task: F) -> Result<(), SubmitError>
  where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<BoxError>,
  {
    self.core.enqueue(boxed_context_task(task), Some(ctx), None).await
  }

  /// Like [`submit`](Self::submit), but gives up after `timeout` if the intake
  /// stays full.
  pub async fn submit_timeout<F, Fut, E>(&self, ctx: &Context, timeout: Duration, task: F) -> Result<(), SubmitError>
  where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<BoxError>,
  {
    self.core.enqueue(boxed_context_task(task), Some(ctx), Some(timeout)).await
  }

  /// Stops accepting tasks, cancels the pool token and waits for the workers
  /// to drain the intake and return.
  ///
  /// Fails with [`PoolError::ShutdownTimeout`] if `ctx` is done first; the
  /// workers keep draining and a later call can wait for them again.
  pub async fn shutdown(&self, ctx: &Context) -> Result<(), PoolError> {
    if self.core.begin_stop() {
      self.results.close_unstarted();
    } else {
      debug!(pool_name = %*self.core.pool_name, "Shutdown already in progress or completed.");
    }

    info!(pool_name = %*self.core.pool_name, "Waiting for workers to finish.");
    match self.core.wait_workers(Some(ctx)).await {
      Ok(()) => {
        info!(pool_name = %*self.core.pool_name, "All workers finished. Pool shut down.");
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

  /// Waits for the next result record. Returns `None` once the pool has shut
  /// down and every buffered record has been read.
  pub async fn next_result(&self) -> Option<TaskResult<T>> {
    self.results.next().await
  }

  /// Reads up to as many records as there are tasks outstanding at entry,
  /// stopping early when `timeout` elapses or the pool shuts down.
  pub async fn fetch_results(&self, timeout: Option<Duration>) -> Vec<TaskResult<T>> {
    self.results.fetch_snapshot(timeout).await
  }

  /// Reads every record that is already buffered, without waiting.
  pub fn try_drain_results(&self) -> Vec<TaskResult<T>> {
    self.results.try_drain()
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

  /// The token handed to running tasks, once the pool has started.
  pub fn pool_token(&self) -> Option<CancellationToken> {
    self.core.pool_token()
  }

  /// Tasks waiting in the intake.
  pub fn tasks_in_queue(&self) -> usize {
    self.core.intake.len()
  }

  /// Tasks currently executing.
  pub fn running(&self) -> u64 {
    self.core.counters.running()
  }

  /// Finished tasks whose result has not been read yet.
  pub fn finished(&self) -> u64 {
    self.core.counters.finished()
  }

  /// Accepted tasks whose result has not been read yet.
  pub fn submitted(&self) -> u64 {
    self.core.counters.submitted()
  }

  pub fn total_submitted(&self) -> u64 {
    self.core.counters.total_submitted()
  }

  pub fn panicked(&self) -> u64 {
    self.core.counters.panicked()
  }

  pub fn buffered_results(&self) -> usize {
    self.results.len()
  }

  pub fn stats(&self) -> PoolStats {
    self.core.stats()
  }
}

impl<T: Send + 'static> Drop for ContextPool<T> {
  fn drop(&mut self) {
    if self.core.begin_stop() {
      info!(
        pool_name = %*self.core.pool_name,
        "ContextPool dropped without shutdown. Intake closed and pool token cancelled; workers will drain and exit."
      );
    } else {
      trace!(pool_name = %*self.core.pool_name, "Drop: Shutdown already in progress or completed.");
    }
  }
}

async fn run_worker<T: Send + 'static>(
  pool_name: Arc<String>,
  worker_id: usize,
  intake: Intake<ContextWork<T>>,
  publisher: ResultPublisher<T>,
  counters: Arc<TaskCounters>,
  pool_token: CancellationToken,
) {
  info!(name = %*pool_name, worker_id, "Worker started.");

  while let Some(task) = intake.recv().await {
    let task_id = task.task_id;
    trace!(name = %*pool_name, worker_id, %task_id, "Dequeued task.");

    let running = counters.begin_task();
    let outcome = match run_context_task(task.work, pool_token.clone()).await {
      Ok(result) => result,
      Err(message) => {
        counters.record_panic();
        error!(name = %*pool_name, worker_id, %task_id, panic = %message, "Task panicked during execution.");
        Err(TaskError::Panicked(message))
      }
    };
    drop(running);

    trace!(name = %*pool_name, worker_id, %task_id, ok = outcome.is_ok(), "Task finished.");
    publisher.publish(task_id, outcome).await;
  }

  info!(name = %*pool_name, worker_id, "Worker stopped: intake closed and drained.");
}
