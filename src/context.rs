//! Cooperative cancellation with optional deadlines.
//!
//! A [`Context`] pairs a [`CancellationToken`] with an optional deadline. Pools
//! take a `Context` for their lifetime (`start`) and for each blocking call
//! (`submit`, `shutdown`, `wait`), and hand the underlying token to running
//! tasks so they can observe shutdown.

use crate::error::ContextError;

use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct Context {
  token: CancellationToken,
  deadline: Option<Instant>,
}

impl Context {
  /// A context that is only ever done when cancelled explicitly.
  pub fn background() -> Self {
    Self::default()
  }

  pub fn with_timeout(timeout: Duration) -> Self {
    Self::background().child_with_timeout(timeout)
  }

  pub fn with_deadline(deadline: Instant) -> Self {
    Self::background().child_with_deadline(deadline)
  }

  /// Derives a child that is done when `self` is done or when the child is
  /// cancelled. Cancelling the child never affects `self`.
  pub fn child(&self) -> Self {
    Self {
      token: self.token.child_token(),
      deadline: self.deadline,
    }
  }

  /// A timeout too large to represent as an instant adds no deadline.
  pub fn child_with_timeout(&self, timeout: Duration) -> Self {
    match Instant::now().checked_add(timeout) {
      Some(deadline) => self.child_with_deadline(deadline),
      None => self.child(),
    }
  }

  /// Like [`child`](Self::child), but also done once `deadline` passes. The
  /// earlier of the parent's deadline and `deadline` wins.
  pub fn child_with_deadline(&self, deadline: Instant) -> Self {
    let deadline = match self.deadline {
      Some(parent) => parent.min(deadline),
      None => deadline,
    };
    Self {
      token: self.token.child_token(),
      deadline: Some(deadline),
    }
  }

  pub fn cancel(&self) {
    self.token.cancel();
  }

  pub fn token(&self) -> &CancellationToken {
    &self.token
  }

  pub fn deadline(&self) -> Option<Instant> {
    self.deadline
  }

  /// `None` while the context is live, otherwise the reason it is done.
  /// Explicit cancellation takes precedence over an expired deadline.
  pub fn err(&self) -> Option<ContextError> {
    if self.token.is_cancelled() {
      return Some(ContextError::Cancelled);
    }
    match self.deadline {
      Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
      _ => None,
    }
  }

  pub fn is_done(&self) -> bool {
    self.err().is_some()
  }

  /// Resolves once the context is done, yielding the reason.
  pub async fn done(&self) -> ContextError {
    match self.deadline {
      Some(deadline) => tokio::select! {
        biased;
        _ = self.token.cancelled() => ContextError::Cancelled,
        _ = sleep_until(deadline) => ContextError::DeadlineExceeded,
      },
      None => {
        self.token.cancelled().await;
        ContextError::Cancelled
      }
    }
  }
}

impl From<CancellationToken> for Context {
  fn from(token: CancellationToken) -> Self {
    Self { token, deadline: None }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn background_is_live_until_cancelled() {
    let ctx = Context::background();
    assert_eq!(ctx.err(), None);
    ctx.cancel();
    assert_eq!(ctx.err(), Some(ContextError::Cancelled));
    assert_eq!(ctx.done().await, ContextError::Cancelled);
  }

  #[tokio::test]
  async fn timeout_expires() {
    let ctx = Context::with_timeout(Duration::from_millis(20));
    assert!(!ctx.is_done());
    assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
    assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
  }

  #[tokio::test]
  async fn child_follows_parent_but_not_the_reverse() {
    let parent = Context::background();
    let child = parent.child();
    child.cancel();
    assert!(child.is_done());
    assert!(!parent.is_done());

    let second = parent.child();
    parent.cancel();
    assert_eq!(second.err(), Some(ContextError::Cancelled));
  }

  #[tokio::test]
  async fn child_keeps_earlier_parent_deadline() {
    let parent = Context::with_timeout(Duration::from_millis(10));
    let child = parent.child_with_timeout(Duration::from_secs(60));
    assert_eq!(child.deadline(), parent.deadline());
    assert_eq!(child.done().await, ContextError::DeadlineExceeded);
  }

  #[tokio::test]
  async fn huge_timeout_means_no_deadline() {
    let ctx = Context::with_timeout(Duration::MAX);
    assert_eq!(ctx.deadline(), None);
    assert!(!ctx.is_done());

    let parent = Context::with_timeout(Duration::from_millis(10));
    let child = parent.child_with_timeout(Duration::MAX);
    assert_eq!(child.deadline(), parent.deadline());
    assert_eq!(child.done().await, ContextError::DeadlineExceeded);
  }
}
