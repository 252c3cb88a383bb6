use crate::config::PoolConfig;
use crate::counters::{PoolStats, TaskCounters};
use crate::error::{BoxError, SubmitError, TaskError};
use crate::intake::Intake;
use crate::pool_core::PoolCore;
use crate::results::{ResultBuffer, ResultPublisher};
use crate::task::{boxed_simple_task, catch_panic, TaskFuture, TaskResult};

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, Instrument};

type SimpleWork<T> = TaskFuture<TaskResult<T>>;

/// A worker pool for context-less fallible tasks.
///
/// Cancellation is internal: [`stop`](Self::stop) releases blocked submitters
/// and fetchers but never reaches into running tasks. Results are collected
/// either as a snapshot ([`fetch_results`](Self::fetch_results)) or until
/// every submitted task has been observed
/// ([`fetch_all_results`](Self::fetch_all_results)).
pub struct SimplePool<T: Send + 'static> {
  core: PoolCore<SimpleWork<T>>,
  results: ResultBuffer<T>,
}

impl<T: Send + 'static> fmt::Debug for SimplePool<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SimplePool")
      .field("name", &self.core.pool_name)
      .field("stats", &self.stats())
      .field("stopped", &self.is_stopped())
      .finish_non_exhaustive()
  }
}

impl<T: Send + 'static> SimplePool<T> {
  pub fn new(workers: usize, queue_capacity: usize) -> Self {
    Self::with_config(PoolConfig::new(workers, queue_capacity).name("simple_pool"))
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

  /// Creates the internal cancellation token and spawns the workers. Must be
  /// called from within a Tokio runtime. Returns `false` if the pool was
  /// already started or stopped.
  pub fn start(&self) -> bool {
    let workers = self.core.config.workers;
    self.core.lifecycle.start_with(CancellationToken::new(), |tracker, internal_token| {
      let Some(publisher) = self.results.take_publisher(internal_token.clone()) else {
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
          )
          .instrument(info_span!("simple_pool_worker", name = %*self.core.pool_name, worker_id)),
        );
      }
    })
  }

  /// Submits a task. Without a timeout this waits for intake capacity until
  /// the pool stops; with one it gives up once `timeout` has elapsed.
  pub async fn submit<Fut, E>(&self, task: Fut, timeout: Option<Duration>) -> Result<(), SubmitError>
  where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<BoxError>,
  {
    self.core.enqueue(boxed_simple_task(task), None, timeout).await
  }

  /// Collects the results that are outstanding right now.
  ///
  /// Reads at most as many records as `submitted` held on entry and does not
  /// wait for tasks submitted afterwards. Returns early when `timeout`
  /// elapses or the pool stops.
  pub async fn fetch_results(&self, timeout: Option<Duration>) -> Vec<TaskResult<T>> {
    let fetched = self.results.fetch_snapshot(timeout).await;
    debug!(pool_name = %*self.core.pool_name, fetched = fetched.len(), remaining = self.submitted(), "Fetched results.");
    fetched
  }

  /// Collects results until every submitted task, including ones submitted
  /// while this call runs, has been observed. Returns early when `timeout`
  /// elapses or the pool stops.
  pub async fn fetch_all_results(&self, timeout: Option<Duration>) -> Vec<TaskResult<T>> {
    let fetched = self.results.fetch_all(timeout).await;
    debug!(pool_name = %*self.core.pool_name, fetched = fetched.len(), remaining = self.submitted(), "Fetched all results.");
    fetched
  }

  /// Cancels the internal token, closes the intake and waits for the workers
  /// to drain it. Blocked fetchers return their partial batch once the last
  /// worker exits.
  pub async fn stop(&self) {
    if self.core.begin_stop() {
      self.results.close_unstarted();
    }
    // Without a context the wait cannot fail.
    let _ = self.core.wait_workers(None).await;
    info!(pool_name = %*self.core.pool_name, "All workers finished. Pool stopped.");
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

  pub fn tasks_in_queue(&self) -> usize {
    self.core.intake.len()
  }

  /// Accepted tasks whose result has not been fetched yet.
  pub fn submitted(&self) -> u64 {
    self.core.counters.submitted()
  }

  pub fn running(&self) -> u64 {
    self.core.counters.running()
  }

  /// Finished tasks whose result has not been fetched yet.
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

impl<T: Send + 'static> Drop for SimplePool<T> {
  fn drop(&mut self) {
    if self.core.begin_stop() {
      info!(pool_name = %*self.core.pool_name, "SimplePool dropped without stop. Workers will drain and exit.");
    }
  }
}

async fn run_worker<T: Send + 'static>(
  pool_name: Arc<String>,
  worker_id: usize,
  intake: Intake<SimpleWork<T>>,
  publisher: ResultPublisher<T>,
  counters: Arc<TaskCounters>,
) {
  info!(name = %*pool_name, worker_id, "Worker started.");

  while let Some(task) = intake.recv().await {
    let task_id = task.task_id;
    let running = counters.begin_task();
    let outcome = match catch_panic(task.work).await {
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
