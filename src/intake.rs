use crate::context::Context;
use crate::error::{ContextError, SubmitError};
use crate::task::ManagedTask;

use std::fmt;
use std::future::pending;
use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};

/// The bounded FIFO between submitters and workers.
///
/// Backed by an `async_channel` so every worker holds its own receiver clone.
/// Closing the intake refuses further sends (and wakes blocked senders), while
/// tasks already buffered stay receivable until the channel is empty.
pub(crate) struct Intake<W> {
  tx: Sender<ManagedTask<W>>,
  rx: Receiver<ManagedTask<W>>,
}

impl<W> fmt::Debug for Intake<W> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Intake")
      .field("len", &self.tx.len())
      .field("capacity", &self.tx.capacity())
      .field("closed", &self.tx.is_closed())
      .finish()
  }
}

impl<W: Send + 'static> Intake<W> {
  pub(crate) fn new(capacity: usize) -> Self {
    let (tx, rx) = async_channel::bounded(capacity.max(1));
    Self { tx, rx }
  }

  /// Enqueues a task, waiting for capacity when the intake is full.
  ///
  /// Waiting ends early when `ctx` is done, when `timeout` elapses or when the
  /// intake is closed. In each of those cases the task is dropped unrun and the
  /// refusal reason is returned.
  pub(crate) async fn send(
    &self,
    task: ManagedTask<W>,
    ctx: Option<&Context>,
    timeout: Option<Duration>,
  ) -> Result<(), SubmitError> {
    if let Some(err) = ctx.and_then(Context::err) {
      return Err(SubmitError::Cancelled(err));
    }

    let task = match self.tx.try_send(task) {
      Ok(()) => return Ok(()),
      Err(TrySendError::Closed(_)) => return Err(SubmitError::PoolStopped),
      Err(TrySendError::Full(task)) => task,
    };

    tokio::select! {
      biased;
      sent = self.tx.send(task) => sent.map_err(|_| SubmitError::PoolStopped),
      err = done_or_pending(ctx) => Err(SubmitError::Cancelled(err)),
      _ = elapsed_or_pending(timeout) => Err(SubmitError::TimedOut(timeout.unwrap_or_default())),
    }
  }

  /// Takes the next task, or `None` once the intake is closed and drained.
  pub(crate) async fn recv(&self) -> Option<ManagedTask<W>> {
    self.rx.recv().await.ok()
  }

  /// Empties the intake without running anything. Returns how many tasks
  /// were dropped.
  pub(crate) fn discard_queued(&self) -> usize {
    let mut discarded = 0;
    while self.rx.try_recv().is_ok() {
      discarded += 1;
    }
    discarded
  }

  /// A second handle on the same channel, for a worker to own.
  pub(crate) fn consumer(&self) -> Self {
    Self {
      tx: self.tx.clone(),
      rx: self.rx.clone(),
    }
  }

  /// Closes the intake. Returns `true` if this call closed it.
  pub(crate) fn close(&self) -> bool {
    self.tx.close()
  }

  pub(crate) fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }

  pub(crate) fn len(&self) -> usize {
    self.tx.len()
  }
}

async fn done_or_pending(ctx: Option<&Context>) -> ContextError {
  match ctx {
    Some(ctx) => ctx.done().await,
    None => pending().await,
  }
}

async fn elapsed_or_pending(timeout: Option<Duration>) {
  match timeout {
    Some(timeout) => tokio::time::sleep(timeout).await,
    None => pending().await,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  fn dummy_task(id: u64) -> ManagedTask<String> {
    ManagedTask {
      task_id: id,
      work: format!("work-{}", id),
    }
  }

  #[tokio::test]
  async fn test_intake_send_recv() {
    let intake = Intake::<String>::new(5);
    intake.send(dummy_task(1), None, None).await.unwrap();
    assert_eq!(intake.len(), 1);

    let received = intake.recv().await.unwrap();
    assert_eq!(received.task_id, 1);
    assert_eq!(received.work, "work-1");
    assert_eq!(intake.len(), 0);
  }

  #[tokio::test]
  async fn test_intake_capacity_blocks_send() {
    let intake = Intake::<String>::new(1);
    intake.send(dummy_task(1), None, None).await.unwrap();

    let send_future = intake.send(dummy_task(2), None, None);
    tokio::pin!(send_future);

    tokio::select! {
        _ = &mut send_future => {
            panic!("Send should have blocked because the intake is full.");
        },
        _ = tokio::time::sleep(Duration::from_millis(50)) => {}
    }

    // Taking the first task frees the slot for the waiting send.
    assert_eq!(intake.consumer().recv().await.unwrap().task_id, 1);
    tokio::time::timeout(Duration::from_millis(50), send_future)
      .await
      .expect("Send did not complete after the intake was drained.")
      .unwrap();
    assert_eq!(intake.len(), 1);
  }

  #[tokio::test]
  async fn test_send_timeout_when_full() {
    let intake = Intake::<String>::new(1);
    intake.send(dummy_task(1), None, None).await.unwrap();

    let result = intake.send(dummy_task(2), None, Some(Duration::from_millis(30))).await;
    assert_eq!(result, Err(SubmitError::TimedOut(Duration::from_millis(30))));
    assert_eq!(intake.len(), 1);
  }

  #[tokio::test]
  async fn test_send_respects_context() {
    let intake = Intake::<String>::new(1);
    let ctx = Context::background();
    intake.send(dummy_task(1), Some(&ctx), None).await.unwrap();

    let blocked_ctx = ctx.child();
    let canceller = {
      let blocked_ctx = blocked_ctx.clone();
      tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        blocked_ctx.cancel();
      })
    };
    let result = intake.send(dummy_task(2), Some(&blocked_ctx), None).await;
    assert_eq!(result, Err(SubmitError::Cancelled(ContextError::Cancelled)));
    canceller.await.unwrap();

    // An already-done context is refused even when there is room.
    intake.recv().await.unwrap();
    let result = intake.send(dummy_task(3), Some(&blocked_ctx), None).await;
    assert_eq!(result, Err(SubmitError::Cancelled(ContextError::Cancelled)));
  }

  #[tokio::test]
  async fn test_close_wakes_blocked_sender() {
    let intake = Arc::new(Intake::<String>::new(1));
    intake.send(dummy_task(1), None, None).await.unwrap();

    let blocked = {
      let intake = intake.clone();
      tokio::spawn(async move { intake.send(dummy_task(2), None, None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(intake.close());
    assert!(!intake.close());
    assert_eq!(blocked.await.unwrap(), Err(SubmitError::PoolStopped));
  }

  #[tokio::test]
  async fn test_close_lets_consumer_drain() {
    let intake = Intake::<String>::new(2);
    intake.send(dummy_task(1), None, None).await.unwrap();
    intake.send(dummy_task(2), None, None).await.unwrap();
    intake.close();

    assert!(intake.is_closed());
    assert_eq!(intake.send(dummy_task(3), None, None).await, Err(SubmitError::PoolStopped));
    assert_eq!(intake.recv().await.unwrap().task_id, 1);
    assert_eq!(intake.recv().await.unwrap().task_id, 2);
    assert!(intake.recv().await.is_none());
  }

  #[tokio::test]
  async fn test_discard_queued_empties_intake() {
    let intake = Intake::<String>::new(3);
    for i in 0..3 {
      intake.send(dummy_task(i), None, None).await.unwrap();
    }
    intake.close();
    assert_eq!(intake.discard_queued(), 3);
    assert!(intake.recv().await.is_none());
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_intake_concurrent_sends() {
    let intake = Arc::new(Intake::<String>::new(4));
    let num_tasks: u64 = 20;
    let received_count = Arc::new(AtomicUsize::new(0));

    let mut producers = Vec::new();
    for i in 0..num_tasks {
      let intake = intake.clone();
      producers.push(tokio::spawn(async move {
        intake.send(dummy_task(i), None, None).await.unwrap();
      }));
    }

    let consumer_handle = {
      let consumer = intake.consumer();
      let received_count = received_count.clone();
      tokio::spawn(async move {
        for _ in 0..num_tasks {
          if consumer.recv().await.is_some() {
            received_count.fetch_add(1, Ordering::SeqCst);
          }
        }
      })
    };

    for producer in producers {
      producer.await.unwrap();
    }
    consumer_handle.await.unwrap();

    assert_eq!(received_count.load(Ordering::SeqCst), num_tasks as usize);
    assert_eq!(intake.len(), 0);
  }
}
