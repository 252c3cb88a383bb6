use std::time::Duration;
use tracing::info;
use worker_pools::{BoxError, Context, ContextPool, TaskError};

async fn panicking_task() -> Result<String, BoxError> {
  info!("Panicking Task: Starting...");
  tokio::time::sleep(Duration::from_millis(100)).await;
  info!("Panicking Task: About to panic!");
  panic!("This task is designed to panic!");
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Task Panic Example ---");

  let pool = ContextPool::<String>::new(
    1, // Workers
    5, // Queue capacity
  );
  let ctx = Context::background();
  pool.start(&ctx);

  pool
    .submit(&ctx, |_token| panicking_task())
    .await
    .expect("Failed to submit panicking task");
  pool
    .submit(&ctx, |_token| async { Ok::<_, BoxError>("The worker survived.".to_string()) })
    .await
    .expect("Failed to submit follow-up task");

  for _ in 0..2 {
    match pool.next_result().await {
      Some(Ok(result)) => info!("Task completed: {}", result),
      Some(Err(TaskError::Panicked(message))) => info!("Task correctly reported a panic: {}", message),
      Some(Err(e)) => info!("Task resulted in unexpected error: {}", e),
      None => break,
    }
  }
  info!("Panicked tasks so far: {}", pool.panicked());

  info!("Shutting down pool.");
  pool
    .shutdown(&Context::with_timeout(Duration::from_secs(1)))
    .await
    .expect("Pool shutdown failed");
  info!("Pool shutdown complete.");
  info!("--- Task Panic Example End ---");
}
