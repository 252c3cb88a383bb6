mod common;

use common::setup_tracing_for_test;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use worker_pools::{Context, ContextError, JobQueue, PoolConfig, PoolError, SubmitError};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wait_for_many_jobs() {
  setup_tracing_for_test();
  let queue = JobQueue::with_config(PoolConfig::new(4, 20).name("test_queue_many_jobs"));
  let ctx = Context::background();
  queue.start(&ctx);

  let executed = Arc::new(AtomicUsize::new(0));
  for _ in 0..100 {
    let executed = executed.clone();
    queue
      .submit(&ctx, move |_token| async move {
        sleep(Duration::from_millis(10)).await;
        executed.fetch_add(1, Ordering::SeqCst);
      })
      .await
      .unwrap();
  }

  queue.wait(&Context::with_timeout(Duration::from_secs(1))).await.unwrap();
  assert_eq!(executed.load(Ordering::SeqCst), 100);
  assert_eq!(queue.finished(), 100);
  assert_eq!(queue.submitted(), 100);
  assert_eq!(queue.running(), 0);
  assert_eq!(queue.outstanding(), 0);

  queue.shutdown(&Context::with_timeout(Duration::from_secs(1))).await.unwrap();
}

#[tokio::test]
async fn test_wait_on_idle_queue_returns_immediately() {
  setup_tracing_for_test();
  let queue = JobQueue::new(2, 2);
  queue.start(&Context::background());

  tokio::time::timeout(Duration::from_millis(100), queue.wait(&Context::background()))
    .await
    .expect("wait on an idle queue should not block")
    .unwrap();

  queue.shutdown(&Context::with_timeout(Duration::from_secs(1))).await.unwrap();
}

#[tokio::test]
async fn test_wait_cancelled_then_retried() {
  setup_tracing_for_test();
  let queue = JobQueue::new(1, 4);
  let ctx = Context::background();
  queue.start(&ctx);

  queue
    .submit(&ctx, |_token| async {
      sleep(Duration::from_millis(150)).await;
    })
    .await
    .unwrap();

  let err = queue.wait(&Context::with_timeout(Duration::from_millis(20))).await.unwrap_err();
  assert_eq!(err, PoolError::WaitCancelled(ContextError::DeadlineExceeded));

  let cancelled = Context::background();
  cancelled.cancel();
  let err = queue.wait(&cancelled).await.unwrap_err();
  assert_eq!(err, PoolError::WaitCancelled(ContextError::Cancelled));

  queue.wait(&Context::with_timeout(Duration::from_secs(1))).await.unwrap();
  assert_eq!(queue.finished(), 1);

  queue.shutdown(&Context::with_timeout(Duration::from_secs(1))).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_waiters_all_released() {
  setup_tracing_for_test();
  let queue = Arc::new(JobQueue::new(2, 10));
  let ctx = Context::background();
  queue.start(&ctx);

  for _ in 0..6 {
    queue
      .submit(&ctx, |_token| async {
        sleep(Duration::from_millis(30)).await;
      })
      .await
      .unwrap();
  }

  let mut waiters = Vec::new();
  for _ in 0..3 {
    let queue = queue.clone();
    waiters.push(tokio::spawn(async move {
      queue.wait(&Context::with_timeout(Duration::from_secs(2))).await
    }));
  }
  for waiter in waiters {
    waiter.await.unwrap().unwrap();
  }
  assert_eq!(queue.finished(), 6);

  queue.shutdown(&Context::with_timeout(Duration::from_secs(1))).await.unwrap();
}

#[tokio::test]
async fn test_panicking_job_is_counted() {
  setup_tracing_for_test();
  let queue = JobQueue::new(1, 4);
  let ctx = Context::background();
  queue.start(&ctx);

  let executed = Arc::new(AtomicUsize::new(0));
  queue
    .submit(&ctx, |_token| async {
      panic!("job exploded");
    })
    .await
    .unwrap();
  let after = executed.clone();
  queue
    .submit(&ctx, move |_token| async move {
      after.fetch_add(1, Ordering::SeqCst);
    })
    .await
    .unwrap();

  queue.wait(&Context::with_timeout(Duration::from_secs(1))).await.unwrap();
  assert_eq!(queue.panicked(), 1);
  assert_eq!(queue.finished(), 2);
  assert_eq!(executed.load(Ordering::SeqCst), 1);

  queue.shutdown(&Context::with_timeout(Duration::from_secs(1))).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_cancels_queue_token_and_refuses_jobs() {
  setup_tracing_for_test();
  let queue = JobQueue::new(1, 2);
  let ctx = Context::background();
  queue.start(&ctx);

  let observed = Arc::new(AtomicUsize::new(0));
  let seen = observed.clone();
  queue
    .submit(&ctx, move |token| async move {
      token.cancelled().await;
      seen.fetch_add(1, Ordering::SeqCst);
    })
    .await
    .unwrap();
  sleep(Duration::from_millis(20)).await;
  assert_eq!(queue.running(), 1);

  queue.shutdown(&Context::with_timeout(Duration::from_secs(1))).await.unwrap();
  assert_eq!(observed.load(Ordering::SeqCst), 1);
  assert!(queue.queue_token().is_some_and(|token| token.is_cancelled()));

  let refused = queue.submit(&ctx, |_token| async {}).await;
  assert_eq!(refused, Err(SubmitError::PoolStopped));
  // Wait still succeeds once everything accepted has finished.
  queue.wait(&Context::background()).await.unwrap();
}

async fn block(_token: CancellationToken) {
  sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_submit_timeout_when_queue_full() {
  setup_tracing_for_test();
  let queue = JobQueue::new(1, 1);
  let ctx = Context::background();
  queue.start(&ctx);

  queue.submit(&ctx, block).await.unwrap();
  sleep(Duration::from_millis(20)).await;
  queue.submit(&ctx, block).await.unwrap();

  let timed_out = queue.submit_timeout(&ctx, Duration::from_millis(30), block).await;
  assert_eq!(timed_out, Err(SubmitError::TimedOut(Duration::from_millis(30))));
  assert_eq!(queue.submitted(), 2);

  queue.wait(&Context::with_timeout(Duration::from_secs(2))).await.unwrap();
  queue.shutdown(&Context::with_timeout(Duration::from_secs(1))).await.unwrap();
}
