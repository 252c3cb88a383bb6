use std::time::Duration;
use tracing::{error, info};
use worker_pools::{BoxError, Context, ContextPool};

async fn my_task_fn(id: usize, delay_ms: u64) -> Result<String, BoxError> {
  info!("Task {} starting, will sleep for {}ms", id, delay_ms);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  let result = format!("Task {} finished successfully after {}ms", id, delay_ms);
  info!("{}", result);
  Ok(result)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Basic Usage Example ---");

  let pool = ContextPool::<String>::new(
    2,  // Workers
    10, // Queue capacity
  );
  let ctx = Context::background();
  pool.start(&ctx);

  for i in 0..5 {
    // Alternate sleep times for variety
    let sleep_duration: u64 = 200 + (i as u64 % 3 * 100);
    match pool.submit(&ctx, move |_token| my_task_fn(i, sleep_duration)).await {
      Ok(()) => info!("Submitted task {}", i),
      Err(e) => error!("Failed to submit task {}: {}", i, e),
    }
  }

  info!("All tasks submitted. Shutting down and collecting results...");
  pool
    .shutdown(&Context::with_timeout(Duration::from_secs(5)))
    .await
    .expect("Pool shutdown failed");

  while let Some(result) = pool.next_result().await {
    match result {
      Ok(message) => info!("Result: {}", message),
      Err(e) => info!("Error: {}", e),
    }
  }

  info!("Final stats: {:?}", pool.stats());
  info!("--- Basic Usage Example End ---");
}
