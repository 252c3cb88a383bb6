use std::time::Duration;
use tracing::info;
use worker_pools::{BoxError, SimplePool, SubmitError};

async fn square(n: u64, delay_ms: u64) -> Result<u64, BoxError> {
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  Ok(n * n)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();
  info!("--- Simple Pool Fetch Example ---");

  let pool = SimplePool::<u64>::new(
    2, // Workers
    2, // Queue capacity
  );
  pool.start();

  for n in 0..4 {
    let delay = if n < 2 { 10 } else { 300 };
    match pool.submit(square(n, delay), Some(Duration::from_millis(500))).await {
      Ok(()) => info!("Submitted {}", n),
      Err(SubmitError::TimedOut(after)) => info!("Intake stayed full for {:?}, skipped {}", after, n),
      Err(e) => info!("Submit failed: {}", e),
    }
  }

  let snapshot = pool.fetch_results(Some(Duration::from_millis(100))).await;
  info!("Snapshot returned {} results, {} still outstanding", snapshot.len(), pool.submitted());

  let rest = pool.fetch_all_results(Some(Duration::from_secs(2))).await;
  info!("Drained the remaining {} results", rest.len());
  for result in snapshot.into_iter().chain(rest) {
    match result {
      Ok(value) => info!("Result: {}", value),
      Err(e) => info!("Error: {}", e),
    }
  }

  pool.stop().await;
  info!("--- Simple Pool Fetch Example End ---");
}
