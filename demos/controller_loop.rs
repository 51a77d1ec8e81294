//! A small controller: keys are queued by a fake watcher, and a worker pool
//! reconciles them, retrying failures with per-key backoff.
//!
//! Run with `RUST_LOG=debug cargo run --example controller_loop`.

use async_trait::async_trait;
use requeue::core::factory;
use requeue::{
    DelayingWorkQueue, RateLimitingWorkQueue, Reconciler, WorkQueue, Worker, WorkerConfig,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Pretends each deployment needs a few attempts before it converges.
struct DeploymentReconciler {
    attempts: Mutex<HashMap<String, usize>>,
}

#[async_trait]
impl Reconciler<String> for DeploymentReconciler {
    type Error = String;

    async fn reconcile(&self, key: String) -> Result<(), String> {
        let attempt = {
            let mut attempts = self.attempts.lock().map_err(|e| e.to_string())?;
            let n = attempts.entry(key.clone()).or_insert(0);
            *n += 1;
            *n
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        // Keys ending in a digit converge after that many failures.
        let needed = key
            .chars()
            .last()
            .and_then(|c| c.to_digit(10))
            .unwrap_or(0) as usize;
        if attempt <= needed {
            return Err(format!("{key}: replicas not ready (attempt {attempt})"));
        }
        info!(%key, attempt, "converged");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    requeue::init();

    let queue = factory::controller_queue::<String>()?;
    let worker: Worker<String, _, _> = Worker::new(
        queue.clone(),
        DeploymentReconciler {
            attempts: Mutex::new(HashMap::new()),
        },
        WorkerConfig::default()
            .with_workers(2)
            .with_poll_interval(Duration::from_millis(100)),
    )?;

    // A watcher reporting the same objects more than once.
    for key in ["default/web-0", "default/api-2", "default/web-0", "jobs/batch-3"] {
        queue.add(key.to_string());
    }
    queue.add_after("default/web-0".to_string(), Duration::from_millis(300));

    let cancel = CancellationToken::new();
    let run = {
        let worker = worker.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_secs(2)).await;
    info!(
        pending = queue.len(),
        retries = queue.num_requeues(&"jobs/batch-3".to_string()),
        "shutting down"
    );
    queue.shutdown();
    cancel.cancel();

    let stats = run.await?;
    info!(?stats, "done");
    Ok(())
}
