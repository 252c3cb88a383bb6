use crate::context::Context;
use crate::error::ContextError;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

#[derive(Debug, Default)]
struct LifecycleState {
  started: bool,
  token: Option<CancellationToken>,
}

/// Start/stop bookkeeping shared by every pool.
///
/// `start` and `begin_stop` are serialised by one lock so a pool can never be
/// started after (or while) it is being stopped. `stopped` is also mirrored in
/// an atomic for lock-free reads on the submit path.
#[derive(Debug)]
pub(crate) struct Lifecycle {
  pool_name: Arc<String>,
  state: Mutex<LifecycleState>,
  stopped: AtomicBool,
  workers: TaskTracker,
}

impl Lifecycle {
  pub(crate) fn new(pool_name: Arc<String>) -> Self {
    Self {
      pool_name,
      state: Mutex::new(LifecycleState::default()),
      stopped: AtomicBool::new(false),
      workers: TaskTracker::new(),
    }
  }

  pub(crate) fn is_started(&self) -> bool {
    self.state.lock().started
  }

  pub(crate) fn is_stopped(&self) -> bool {
    self.stopped.load(Ordering::Acquire)
  }

  /// The token running tasks receive, once the pool has started.
  pub(crate) fn token(&self) -> Option<CancellationToken> {
    self.state.lock().token.clone()
  }

  /// Runs `spawn` once with the pool's token and worker tracker. Later calls,
  /// and calls after the pool has been stopped, are no-ops returning `false`.
  pub(crate) fn start_with<F>(&self, token: CancellationToken, spawn: F) -> bool
  where
    F: FnOnce(&TaskTracker, &CancellationToken),
  {
    let mut state = self.state.lock();
    if state.started || self.is_stopped() {
      trace!(pool_name = %*self.pool_name, "Start ignored: pool already started or stopped.");
      return false;
    }
    state.started = true;
    spawn(&self.workers, &token);
    state.token = Some(token);
    info!(pool_name = %*self.pool_name, "Pool started.");
    true
  }

  /// Flips the pool to stopped. Only the first caller runs `close` and cancels
  /// the pool token; it gets `true` back.
  pub(crate) fn begin_stop<F>(&self, close: F) -> bool
  where
    F: FnOnce(),
  {
    let state = self.state.lock();
    if self.stopped.swap(true, Ordering::AcqRel) {
      return false;
    }
    close();
    if let Some(token) = &state.token {
      token.cancel();
    }
    self.workers.close();
    debug!(pool_name = %*self.pool_name, "Pool stopping: intake closed and pool token cancelled.");
    true
  }

  /// Waits for every spawned worker to return, or for `ctx` to be done.
  /// Safe to call repeatedly and concurrently.
  pub(crate) async fn wait_workers(&self, ctx: Option<&Context>) -> Result<(), ContextError> {
    match ctx {
      Some(ctx) => tokio::select! {
        biased;
        _ = self.workers.wait() => Ok(()),
        err = ctx.done() => {
          if self.workers.is_closed() && self.workers.is_empty() {
            Ok(())
          } else {
            Err(err)
          }
        }
      },
      None => {
        self.workers.wait().await;
        Ok(())
      }
    }
  }

  #[cfg(test)]
  pub(crate) fn live_workers(&self) -> usize {
    self.workers.len()
  }
}
