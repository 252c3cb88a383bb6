use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use worker_pools::{BoxError, Context, ContextPool};

async fn work_task_fn(id: usize, duration_ms: u64, token: CancellationToken) -> Result<String, BoxError> {
  info!("Task {} starting (will run for {}ms)", id, duration_ms);
  tokio::select! {
    _ = tokio::time::sleep(Duration::from_millis(duration_ms)) => {
      Ok(format!("Task {} finished after {}ms", id, duration_ms))
    }
    _ = token.cancelled() => {
      info!("Task {} observed shutdown, wrapping up early", id);
      Ok(format!("Task {} stopped early", id))
    }
  }
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Graceful Shutdown Example ---");

  let pool = Arc::new(ContextPool::<String>::new(
    2, // Workers
    10,
  ));
  let ctx = Context::background();
  pool.start(&ctx);

  // Tasks 0 and 1 start right away, tasks 2..5 wait in the intake.
  // Shutdown still drains the intake; queued tasks see the cancelled token.
  for i in 0..5 {
    match pool.submit(&ctx, move |token| work_task_fn(i, 2000, token)).await {
      Ok(()) => info!("Submitted task {}", i),
      Err(e) => tracing::error!("Failed to submit task {}: {}", i, e),
    }
  }

  info!(
    "All 5 tasks submitted. Queue size: {}, Running: {}",
    pool.tasks_in_queue(),
    pool.running()
  );
  tokio::time::sleep(Duration::from_millis(100)).await;

  let pool_for_shutdown = pool.clone();
  let shutdown_jh = tokio::spawn(async move {
    info!("Calling pool.shutdown()...");
    pool_for_shutdown
      .shutdown(&Context::with_timeout(Duration::from_secs(5)))
      .await
      .expect("Graceful shutdown failed");
    info!("Pool shutdown call completed.");
  });

  tokio::time::sleep(Duration::from_millis(50)).await;
  info!("Attempting to submit task after shutdown initiated...");
  match pool.submit(&ctx, |token| work_task_fn(99, 100, token)).await {
    Ok(()) => tracing::error!("LATE SUBMISSION SUCCEEDED (UNEXPECTED!)"),
    Err(e) => info!("Late submission correctly failed: {}", e),
  }

  shutdown_jh.await.expect("Shutdown join handle failed");

  info!("Collecting results...");
  for result in pool.try_drain_results() {
    match result {
      Ok(message) => info!("{}", message),
      Err(e) => info!("Task error: {}", e),
    }
  }

  info!("Final stats: {:?}", pool.stats());
  info!("--- Graceful Shutdown Example End ---");
}
