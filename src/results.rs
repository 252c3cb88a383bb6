use crate::counters::TaskCounters;
use crate::task::TaskResult;

use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// The bounded results channel of a typed pool, together with the counter
/// bookkeeping that happens whenever a record is handed to the caller.
///
/// Only workers hold senders once the pool has started, so the channel closes
/// exactly once: when the last worker returns.
pub(crate) struct ResultBuffer<T> {
  pool_name: Arc<String>,
  unstarted_tx: Mutex<Option<Sender<TaskResult<T>>>>,
  rx: Receiver<TaskResult<T>>,
  counters: Arc<TaskCounters>,
}

impl<T: Send + 'static> ResultBuffer<T> {
  pub(crate) fn new(pool_name: Arc<String>, capacity: usize, counters: Arc<TaskCounters>) -> Self {
    let (tx, rx) = async_channel::bounded(capacity.max(1));
    Self {
      pool_name,
      unstarted_tx: Mutex::new(Some(tx)),
      rx,
      counters,
    }
  }

  /// Hands out the sending side for the workers. Only the first call gets it.
  pub(crate) fn take_publisher(&self, stop_token: CancellationToken) -> Option<ResultPublisher<T>> {
    self.unstarted_tx.lock().take().map(|tx| ResultPublisher {
      pool_name: self.pool_name.clone(),
      tx,
      stop_token,
      counters: self.counters.clone(),
    })
  }

  /// Closes the channel of a pool that is stopped before it ever started, so
  /// blocked fetchers return.
  pub(crate) fn close_unstarted(&self) {
    if let Some(tx) = self.unstarted_tx.lock().take() {
      tx.close();
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.rx.len()
  }

  /// Waits for the next record. `None` once every worker has returned and the
  /// buffer is empty.
  pub(crate) async fn next(&self) -> Option<TaskResult<T>> {
    let result = self.rx.recv().await.ok()?;
    self.counters.observe_result();
    Some(result)
  }

  pub(crate) fn try_drain(&self) -> Vec<TaskResult<T>> {
    let mut drained = Vec::with_capacity(self.rx.len());
    while let Ok(result) = self.rx.try_recv() {
      self.counters.observe_result();
      drained.push(result);
    }
    drained
  }

  /// Drains up to the number of results outstanding at entry. Returns early
  /// when `timeout` elapses or the channel closes.
  pub(crate) async fn fetch_snapshot(&self, timeout: Option<Duration>) -> Vec<TaskResult<T>> {
    let target = usize::try_from(self.counters.submitted()).unwrap_or(usize::MAX);
    self.fetch_while(timeout, |drained, _| drained < target).await
  }

  /// Drains until no submitted task is left unobserved, including tasks
  /// submitted while this call runs. Returns early when `timeout` elapses or
  /// the channel closes.
  pub(crate) async fn fetch_all(&self, timeout: Option<Duration>) -> Vec<TaskResult<T>> {
    self.fetch_while(timeout, |_, counters| counters.submitted() > 0).await
  }

  async fn fetch_while<F>(&self, timeout: Option<Duration>, keep_going: F) -> Vec<TaskResult<T>>
  where
    F: Fn(usize, &TaskCounters) -> bool,
  {
    // Unrepresentable deadlines mean no deadline at all.
    let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
    let mut drained = Vec::new();

    loop {
      let changed = self.counters.changed();
      tokio::pin!(changed);
      changed.as_mut().enable();

      if !keep_going(drained.len(), &self.counters) {
        break;
      }

      let received = tokio::select! {
        biased;
        received = recv_until(&self.rx, deadline) => received,
        // A withdrawn submission can satisfy the condition without a record arriving.
        _ = &mut changed => continue,
      };

      match received {
        Received::Record(result) => {
          self.counters.observe_result();
          drained.push(result);
        }
        Received::TimedOut => {
          trace!(pool_name = %*self.pool_name, drained = drained.len(), "Fetch timed out.");
          break;
        }
        Received::Closed => {
          trace!(pool_name = %*self.pool_name, drained = drained.len(), "Results channel closed during fetch.");
          break;
        }
      }
    }

    drained
  }
}

enum Received<T> {
  Record(T),
  TimedOut,
  Closed,
}

async fn recv_until<T>(rx: &Receiver<T>, deadline: Option<Instant>) -> Received<T> {
  let received = match deadline {
    Some(deadline) => match timeout_at(deadline, rx.recv()).await {
      Ok(received) => received,
      Err(_) => return Received::TimedOut,
    },
    None => rx.recv().await,
  };
  match received {
    Ok(record) => Received::Record(record),
    Err(_) => Received::Closed,
  }
}

/// A worker's handle for publishing result records.
pub(crate) struct ResultPublisher<T> {
  pool_name: Arc<String>,
  tx: Sender<TaskResult<T>>,
  stop_token: CancellationToken,
  counters: Arc<TaskCounters>,
}

impl<T> Clone for ResultPublisher<T> {
  fn clone(&self) -> Self {
    Self {
      pool_name: self.pool_name.clone(),
      tx: self.tx.clone(),
      stop_token: self.stop_token.clone(),
      counters: self.counters.clone(),
    }
  }
}

impl<T: Send + 'static> ResultPublisher<T> {
  /// Buffers one record, waiting for room while the pool is live.
  ///
  /// Once the pool is stopping a full buffer no longer blocks the worker: the
  /// record is discarded and accounted for as observed so the counters still
  /// settle.
  pub(crate) async fn publish(&self, task_id: u64, result: TaskResult<T>) {
    let result = match self.tx.try_send(result) {
      Ok(()) => return,
      Err(TrySendError::Full(result)) => result,
      Err(TrySendError::Closed(_)) => {
        warn!(pool_name = %*self.pool_name, %task_id, "Results channel closed. Result discarded.");
        self.counters.observe_result();
        return;
      }
    };

    let delivered = tokio::select! {
      biased;
      sent = self.tx.send(result) => sent.is_ok(),
      _ = self.stop_token.cancelled() => false,
    };
    if !delivered {
      warn!(
        pool_name = %*self.pool_name,
        %task_id,
        "Results buffer full while the pool is stopping. Result discarded."
      );
      self.counters.observe_result();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::TaskError;

  fn buffer(capacity: usize) -> (ResultBuffer<u32>, Arc<TaskCounters>) {
    let counters = Arc::new(TaskCounters::default());
    (ResultBuffer::new(Arc::new("results_test".to_string()), capacity, counters.clone()), counters)
  }

  fn finish_task(counters: &TaskCounters) {
    counters.reserve().commit();
    drop(counters.begin_task());
  }

  #[tokio::test]
  async fn fetched_records_release_counters() {
    let (results, counters) = buffer(4);
    let publisher = results.take_publisher(CancellationToken::new()).unwrap();
    assert!(results.take_publisher(CancellationToken::new()).is_none());

    for i in 0..3 {
      finish_task(&counters);
      publisher.publish(u64::from(i), Ok(i)).await;
    }
    let fetched = results.fetch_snapshot(Some(Duration::from_millis(50))).await;
    assert_eq!(fetched.len(), 3);
    assert_eq!(counters.submitted(), 0);
    assert_eq!(counters.finished(), 0);
    assert_eq!(counters.total_submitted(), 3);
  }

  #[tokio::test]
  async fn snapshot_ignores_later_submissions() {
    let (results, counters) = buffer(4);
    let publisher = results.take_publisher(CancellationToken::new()).unwrap();
    finish_task(&counters);
    publisher.publish(1, Ok(1)).await;

    // Submitted but never finished: the snapshot target is 2, so it waits out the timeout.
    counters.reserve().commit();
    let fetched = results.fetch_snapshot(Some(Duration::from_millis(30))).await;
    assert_eq!(fetched.len(), 1);
    assert_eq!(counters.submitted(), 1);
  }

  #[tokio::test]
  async fn closing_unstarted_buffer_releases_fetchers() {
    let (results, counters) = buffer(2);
    counters.reserve().commit();
    results.close_unstarted();
    let fetched = results.fetch_all(None).await;
    assert!(fetched.is_empty());
    assert!(results.next().await.is_none());
  }

  #[tokio::test]
  async fn full_buffer_discards_once_stopping() {
    let (results, counters) = buffer(1);
    let stop = CancellationToken::new();
    let publisher = results.take_publisher(stop.clone()).unwrap();

    finish_task(&counters);
    publisher.publish(1, Ok(1)).await;
    finish_task(&counters);
    stop.cancel();
    publisher.publish(2, Err(TaskError::Panicked("late".into()))).await;

    assert_eq!(counters.submitted(), 1);
    let drained = results.try_drain();
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].as_ref().ok(), Some(&1));
    assert_eq!(results.len(), 0);
  }

  #[tokio::test]
  async fn huge_fetch_timeout_is_unbounded() {
    let (results, counters) = buffer(4);
    let publisher = results.take_publisher(CancellationToken::new()).unwrap();
    for i in 0..2 {
      finish_task(&counters);
      publisher.publish(u64::from(i), Ok(i)).await;
    }
    assert_eq!(results.fetch_snapshot(Some(Duration::MAX)).await.len(), 2);

    finish_task(&counters);
    publisher.publish(2, Ok(2)).await;
    assert_eq!(results.fetch_all(Some(Duration::MAX)).await.len(), 1);
    assert_eq!(counters.submitted(), 0);
  }
}
