use crate::error::{BoxError, TaskError};

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

lazy_static::lazy_static! {
  static ref NEXT_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// The result record a typed pool produces for each task.
pub type TaskResult<T> = Result<T, TaskError>;

/// Type-erased future executed by a worker.
pub type TaskFuture<R> = BoxFuture<'static, R>;

/// Type-erased callable that receives the pool's cancellation token.
pub(crate) type ContextTaskFn<R> = Box<dyn FnOnce(CancellationToken) -> TaskFuture<R> + Send + 'static>;

/// A unit of work sitting in (or just taken from) a pool's intake.
pub(crate) struct ManagedTask<W> {
  pub(crate) task_id: u64,
  pub(crate) work: W,
}

impl<W> ManagedTask<W> {
  pub(crate) fn new(work: W) -> Self {
    Self {
      task_id: NEXT_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed),
      work,
    }
  }
}

/// Boxes a context-aware fallible task, mapping its error into [`TaskError`].
pub(crate) fn boxed_context_task<T, E, F, Fut>(task: F) -> ContextTaskFn<TaskResult<T>>
where
  T: Send + 'static,
  E: Into<BoxError>,
  F: FnOnce(CancellationToken) -> Fut + Send + 'static,
  Fut: Future<Output = Result<T, E>> + Send + 'static,
{
  Box::new(move |token: CancellationToken| async move { task(token).await.map_err(TaskError::failed) }.boxed())
}

/// Boxes a context-aware task without a result.
pub(crate) fn boxed_job<F, Fut>(job: F) -> ContextTaskFn<()>
where
  F: FnOnce(CancellationToken) -> Fut + Send + 'static,
  Fut: Future<Output = ()> + Send + 'static,
{
  Box::new(move |token: CancellationToken| async move { job(token).await }.boxed())
}

/// Boxes a context-less fallible task.
pub(crate) fn boxed_simple_task<T, E, Fut>(task: Fut) -> TaskFuture<TaskResult<T>>
where
  T: Send + 'static,
  E: Into<BoxError>,
  Fut: Future<Output = Result<T, E>> + Send + 'static,
{
  async move { task.await.map_err(TaskError::failed) }.boxed()
}

/// Invokes a context task, turning a panic into its message.
///
/// The callable itself is called from inside the guarded future, so a panic
/// raised before its first `.await` is caught as well.
pub(crate) async fn run_context_task<R>(work: ContextTaskFn<R>, token: CancellationToken) -> Result<R, String> {
  catch_panic(async move { work(token).await }).await
}

pub(crate) async fn catch_panic<F>(future: F) -> Result<F::Output, String>
where
  F: Future,
{
  AssertUnwindSafe(future).catch_unwind().await.map_err(panic_message)
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(message) = payload.downcast_ref::<&'static str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
