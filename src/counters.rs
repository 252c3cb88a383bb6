use crate::context::Context;
use crate::error::ContextError;

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

const SNAPSHOT_ATTEMPTS: u32 = 4;

/// Point-in-time copy of a pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
  /// Accepted tasks whose result has not been observed yet.
  pub submitted: u64,
  pub running: u64,
  /// Finished tasks whose result has not been observed yet.
  pub finished: u64,
  /// Every task ever accepted. Never decreases.
  pub total_submitted: u64,
  pub panicked: u64,
  pub queued: usize,
}

/// The `submitted` / `running` / `finished` counter model shared by all pools.
///
/// Writes are ordered so that `submitted >= running + finished` holds
/// between the atomics: `submitted` is reserved before a task is enqueued and
/// only released after `finished`, while a completing task leaves `running`
/// before it enters `finished`. The three counters are still read one at a
/// time, so [`snapshot`](Self::snapshot) re-reads and clamps to keep the
/// relation in what it returns.
#[derive(Debug, Default)]
pub(crate) struct TaskCounters {
  submitted: AtomicU64,
  running: AtomicU64,
  finished: AtomicU64,
  total_submitted: AtomicU64,
  panicked: AtomicU64,
  changed: Notify,
}

impl TaskCounters {
  pub(crate) fn submitted(&self) -> u64 {
    self.submitted.load(Ordering::Acquire)
  }

  pub(crate) fn running(&self) -> u64 {
    self.running.load(Ordering::Acquire)
  }

  pub(crate) fn finished(&self) -> u64 {
    self.finished.load(Ordering::Acquire)
  }

  pub(crate) fn total_submitted(&self) -> u64 {
    self.total_submitted.load(Ordering::Acquire)
  }

  pub(crate) fn panicked(&self) -> u64 {
    self.panicked.load(Ordering::Acquire)
  }

  /// Reads the counters one by one, retrying while `submitted` or `finished`
  /// moves under the read. The result is clamped so that
  /// `submitted >= running + finished` holds in the returned value even if a
  /// concurrent update slipped through.
  pub(crate) fn snapshot(&self, queued: usize) -> PoolStats {
    let mut attempts = 0;
    let (submitted, running, finished) = loop {
      let submitted = self.submitted();
      let finished = self.finished();
      let running = self.running();
      attempts += 1;
      let settled = self.submitted() == submitted && self.finished() == finished;
      if settled || attempts == SNAPSHOT_ATTEMPTS {
        break (submitted, running, finished);
      }
    };
    let running = running.min(submitted);
    PoolStats {
      submitted,
      running,
      finished: finished.min(submitted - running),
      total_submitted: self.total_submitted(),
      panicked: self.panicked(),
      queued,
    }
  }

  /// Claims a `submitted` slot ahead of an enqueue attempt. The returned guard
  /// releases the slot again unless [`SubmissionSlot::commit`] is called.
  pub(crate) fn reserve(&self) -> SubmissionSlot<'_> {
    self.submitted.fetch_add(1, Ordering::AcqRel);
    SubmissionSlot {
      counters: self,
      committed: false,
    }
  }

  /// Marks one task as running. Dropping the guard moves it to `finished`,
  /// which also happens when the worker future is torn down mid-task.
  pub(crate) fn begin_task(&self) -> RunningTask<'_> {
    self.running.fetch_add(1, Ordering::AcqRel);
    RunningTask { counters: self }
  }

  pub(crate) fn record_panic(&self) {
    self.panicked.fetch_add(1, Ordering::AcqRel);
  }

  /// Accounts for one result record handed to the caller.
  pub(crate) fn observe_result(&self) {
    self.finished.fetch_sub(1, Ordering::AcqRel);
    self.submitted.fetch_sub(1, Ordering::AcqRel);
    self.changed.notify_waiters();
  }

  /// Releases the slot of an accepted task that will never run.
  pub(crate) fn withdraw(&self) {
    self.submitted.fetch_sub(1, Ordering::AcqRel);
    self.changed.notify_waiters();
  }

  /// Resolves after the next counter change that can affect a drain condition.
  pub(crate) fn changed(&self) -> Notified<'_> {
    self.changed.notified()
  }

  /// Blocks until `condition` holds or `ctx` is done. The condition is
  /// re-checked every time a counter that can make it true changes.
  pub(crate) async fn wait_until<F>(&self, ctx: &Context, condition: F) -> Result<(), ContextError>
  where
    F: Fn(&TaskCounters) -> bool,
  {
    loop {
      let notified = self.changed();
      tokio::pin!(notified);
      // Register before checking so a change between check and await is not missed.
      notified.as_mut().enable();

      if condition(self) {
        return Ok(());
      }
      if let Some(err) = ctx.err() {
        return Err(err);
      }

      tokio::select! {
        _ = &mut notified => {}
        err = ctx.done() => {
          if condition(self) {
            return Ok(());
          }
          return Err(err);
        }
      }
    }
  }
}

/// A reserved `submitted` slot. See [`TaskCounters::reserve`].
#[derive(Debug)]
pub(crate) struct SubmissionSlot<'a> {
  counters: &'a TaskCounters,
  committed: bool,
}

impl SubmissionSlot<'_> {
  pub(crate) fn commit(mut self) {
    self.committed = true;
    self.counters.total_submitted.fetch_add(1, Ordering::AcqRel);
  }
}

impl Drop for SubmissionSlot<'_> {
  fn drop(&mut self) {
    if !self.committed {
      self.counters.submitted.fetch_sub(1, Ordering::AcqRel);
      self.counters.changed.notify_waiters();
    }
  }
}

#[derive(Debug)]
pub(crate) struct RunningTask<'a> {
  counters: &'a TaskCounters,
}

impl Drop for RunningTask<'_> {
  fn drop(&mut self) {
    self.counters.running.fetch_sub(1, Ordering::AcqRel);
    self.counters.finished.fetch_add(1, Ordering::AcqRel);
    self.counters.changed.notify_waiters();
  }
}
