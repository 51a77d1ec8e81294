//! Delaying queue paced by a [`RateLimiter`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::QueueConfig;
use crate::delaying::{DefaultDelayingQueue, DelayingWorkQueue};
use crate::error::QueueError;
use crate::queue::WorkQueue;
use crate::rate_limiter::RateLimiter;
use crate::QueueItem;

/// A [`DelayingWorkQueue`] that turns "this item failed" into "re-add it after
/// the delay the rate limiter asks for".
pub trait RateLimitingWorkQueue<T: QueueItem>: DelayingWorkQueue<T> {
    /// Re-add `item` once the limiter says it may run again.
    fn add_rate_limited(&self, item: T);

    /// Reset the limiter's bookkeeping for `item`. Queue membership is untouched.
    fn forget(&self, item: &T);

    /// Failures recorded for `item` since it was last forgotten.
    fn num_requeues(&self, item: &T) -> usize;
}

/// In-process [`RateLimitingWorkQueue`].
pub struct DefaultRateLimitingQueue<T> {
    queue: DefaultDelayingQueue<T>,
    limiter: Arc<dyn RateLimiter<T>>,
}

impl<T> Clone for DefaultRateLimitingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            limiter: self.limiter.clone(),
        }
    }
}

impl<T: QueueItem> std::fmt::Debug for DefaultRateLimitingQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultRateLimitingQueue")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl<T: QueueItem> DefaultRateLimitingQueue<T> {
    /// Create a queue on the current tokio runtime paced by `limiter`.
    pub fn new(limiter: impl RateLimiter<T> + 'static) -> Result<Self, QueueError> {
        Self::with_config(QueueConfig::default(), limiter)
    }

    pub fn with_config(
        config: QueueConfig,
        limiter: impl RateLimiter<T> + 'static,
    ) -> Result<Self, QueueError> {
        Ok(Self::from_parts(
            DefaultDelayingQueue::with_config(config)?,
            Arc::new(limiter),
        ))
    }

    /// Assemble a queue from an existing delaying queue and a shared limiter.
    pub fn from_parts(queue: DefaultDelayingQueue<T>, limiter: Arc<dyn RateLimiter<T>>) -> Self {
        Self { queue, limiter }
    }

    /// The underlying delaying queue.
    pub fn delaying(&self) -> &DefaultDelayingQueue<T> {
        &self.queue
    }
}

impl<T: QueueItem> RateLimitingWorkQueue<T> for DefaultRateLimitingQueue<T> {
    fn add_rate_limited(&self, item: T) {
        let delay = self.limiter.when(&item);
        debug!(queue = %self.queue.inner().name(), ?item, ?delay, "rate limited requeue");
        self.queue.add_after(item, delay);
    }

    fn forget(&self, item: &T) {
        self.limiter.forget(item);
    }

    fn num_requeues(&self, item: &T) -> usize {
        self.limiter.num_requeues(item)
    }
}

impl<T: QueueItem> DelayingWorkQueue<T> for DefaultRateLimitingQueue<T> {
    fn add_after(&self, item: T, delay: Duration) {
        self.queue.add_after(item, delay)
    }
}

#[async_trait]
impl<T: QueueItem> WorkQueue<T> for DefaultRateLimitingQueue<T> {
    fn add(&self, item: T) {
        self.queue.add(item)
    }

    async fn get(&self) -> Result<T, QueueError> {
        self.queue.get().await
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<T>, QueueError> {
        self.queue.poll(timeout).await
    }

    fn done(&self, item: &T) {
        self.queue.done(item)
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn shutdown(&self) {
        self.queue.shutdown()
    }

    fn is_shutting_down(&self) -> bool {
        self.queue.is_shutting_down()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::ExponentialBackoffRateLimiter;
    use tokio::time::Instant;

    fn backoff() -> ExponentialBackoffRateLimiter<String> {
        ExponentialBackoffRateLimiter::new(Duration::from_millis(5), Duration::from_secs(10))
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_rate_limited_uses_limiter_delay() {
        let queue = DefaultRateLimitingQueue::new(backoff()).unwrap();
        let item = "pod".to_string();

        queue.add_rate_limited(item.clone());
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.num_requeues(&item), 1);
        let start = Instant::now();
        assert_eq!(queue.get().await.unwrap(), item);
        assert!(start.elapsed() >= Duration::from_millis(5));
        queue.done(&item);

        queue.add_rate_limited(item.clone());
        let start = Instant::now();
        assert_eq!(queue.get().await.unwrap(), item);
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert_eq!(queue.num_requeues(&item), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_leaves_membership_alone() {
        let queue = DefaultRateLimitingQueue::new(backoff()).unwrap();
        let item = "pod".to_string();
        queue.add(item.clone());
        queue.add_rate_limited(item.clone());
        queue.forget(&item);
        assert_eq!(queue.num_requeues(&item), 0);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_limiter_between_queues() {
        let limiter: Arc<dyn RateLimiter<String>> = Arc::new(backoff());
        let a = DefaultRateLimitingQueue::from_parts(
            DefaultDelayingQueue::new().unwrap(),
            limiter.clone(),
        );
        let b =
            DefaultRateLimitingQueue::from_parts(DefaultDelayingQueue::new().unwrap(), limiter);
        a.add_rate_limited("x".to_string());
        b.add_rate_limited("x".to_string());
        assert_eq!(a.num_requeues(&"x".to_string()), 2);
    }
}
