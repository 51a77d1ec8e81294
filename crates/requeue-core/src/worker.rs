use async_trait::async_trait;
use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::QueueError;
use crate::rate_limiting::RateLimitingWorkQueue;
use crate::QueueItem;

/// Processes one item pulled from the queue.
///
/// An `Err` sends the item back through the queue's rate limiter; `Ok` resets
/// its backoff.
#[async_trait]
pub trait Reconciler<T>: Send + Sync {
    type Error: Display + Send;

    async fn reconcile(&self, item: T) -> Result<(), Self::Error>;
}

/// Counters collected by a [`Worker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Items taken from the queue and handed to the reconciler.
    pub processed: usize,
    /// Reconciles that returned `Ok`.
    pub succeeded: usize,
    /// Reconciles that failed and were requeued with backoff.
    pub requeued: usize,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicUsize,
    succeeded: AtomicUsize,
    requeued: AtomicUsize,
}

/// Pool of consumer loops driving a [`Reconciler`] from a rate-limiting queue.
///
/// Each loop follows the controller pattern: `get`, reconcile, then on success
/// `forget` and `done`, on failure `add_rate_limited` and `done`.
///
/// # Example
///
/// ```rust,ignore
/// let queue = requeue_core::factory::controller_queue::<String>()?;
/// let config = WorkerConfig::default().with_workers(4);
/// let worker: Worker<String, _, _> = Worker::new(queue.clone(), MyReconciler, config)?;
/// let cancel = CancellationToken::new();
/// let stats = worker.run(cancel.clone()).await;
/// ```
pub struct Worker<T, Q, R> {
    queue: Q,
    reconciler: Arc<R>,
    config: WorkerConfig,
    counters: Arc<Counters>,
    phantom: PhantomData<fn() -> T>,
}

impl<T, Q: Clone, R> Clone for Worker<T, Q, R> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            reconciler: self.reconciler.clone(),
            config: self.config.clone(),
            counters: self.counters.clone(),
            phantom: PhantomData,
        }
    }
}

impl<T, Q, R> Worker<T, Q, R>
where
    T: QueueItem,
    Q: RateLimitingWorkQueue<T>,
    R: Reconciler<T>,
{
    pub fn new(queue: Q, reconciler: R, config: WorkerConfig) -> Result<Self, QueueError> {
        config.validate()?;
        Ok(Self {
            queue,
            reconciler: Arc::new(reconciler),
            config,
            counters: Arc::new(Counters::default()),
            phantom: PhantomData,
        })
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            requeued: self.counters.requeued.load(Ordering::Relaxed),
        }
    }

    /// Process one item if one is ready right now.
    ///
    /// Returns `Ok(true)` if an item was processed, `Ok(false)` if nothing was
    /// ready, or `Err(QueueError::ShuttingDown)` once the queue is drained.
    pub async fn run_once(&self, worker_id: usize) -> Result<bool, QueueError> {
        match self.queue.poll(std::time::Duration::ZERO).await? {
            Some(item) => {
                self.process(worker_id, item).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run `config.workers` loops until `cancel` fires or the queue shuts down.
    pub async fn run(&self, cancel: CancellationToken) -> WorkerStats {
        info!(workers = self.config.workers, "starting workers");
        let loops = (0..self.config.workers).map(|worker_id| self.run_loop(worker_id, &cancel));
        futures::future::join_all(loops).await;
        let stats = self.stats();
        info!(?stats, "workers stopped");
        stats
    }

    #[tracing::instrument(skip(self, cancel))]
    async fn run_loop(&self, worker_id: usize, cancel: &CancellationToken) {
        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("worker cancelled");
                    return;
                }
                polled = self.queue.poll(self.config.poll_interval) => polled,
            };
            match polled {
                Ok(Some(item)) => self.process(worker_id, item).await,
                Ok(None) => continue,
                Err(_) => {
                    debug!("queue shut down, worker exiting");
                    return;
                }
            }
        }
    }

    async fn process(&self, worker_id: usize, item: T) {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        match self.reconciler.reconcile(item.clone()).await {
            Ok(()) => {
                self.queue.forget(&item);
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                debug!(worker_id, ?item, "reconciled");
            }
            Err(e) => {
                self.queue.add_rate_limited(item.clone());
                self.counters.requeued.fetch_add(1, Ordering::Relaxed);
                warn!(
                    worker_id,
                    ?item,
                    error = %e,
                    requeues = self.queue.num_requeues(&item),
                    "reconcile failed, requeued with backoff"
                );
            }
        }
        self.queue.done(&item);
    }
}
