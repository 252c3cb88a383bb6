use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use worker_pools::{Context, JobQueue, PoolConfig};

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();
  info!("--- Job Queue Wait Example ---");

  let queue = JobQueue::with_config(PoolConfig::new(4, 20).name("thumbnail_jobs"));
  let ctx = Context::background();
  queue.start(&ctx);

  let processed = Arc::new(AtomicUsize::new(0));
  for i in 0..100 {
    let processed = processed.clone();
    queue
      .submit(&ctx, move |_token| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        processed.fetch_add(1, Ordering::Relaxed);
        if i % 25 == 0 {
          info!("Job {} done", i);
        }
      })
      .await
      .expect("Failed to submit job");
  }

  info!("Waiting for {} outstanding jobs...", queue.outstanding());
  match queue.wait(&Context::with_timeout(Duration::from_secs(5))).await {
    Ok(()) => info!("All jobs finished: {} processed", processed.load(Ordering::Relaxed)),
    Err(e) => info!("Gave up waiting: {}", e),
  }
  info!("Stats: {:?}", queue.stats());

  queue
    .shutdown(&Context::with_timeout(Duration::from_secs(1)))
    .await
    .expect("Queue shutdown failed");
  info!("--- Job Queue Wait Example End ---");
}
