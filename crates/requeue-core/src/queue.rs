//! Deduplicating FIFO work queue.
//!
//! Items move through three containers guarded by one lock:
//!
//! - `ready`: items waiting to be handed out, in FIFO order, without duplicates
//! - `dirty`: items that still need processing
//! - `processing`: items currently checked out by a consumer
//!
//! An item re-added while it is being processed stays in `dirty` only; `done`
//! moves it back to `ready`. A given item is therefore never processed by two
//! consumers at once, and a re-add that arrives mid-flight is never lost.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::QueueItem;

/// A deduplicating work queue shared between producers and consumers.
#[async_trait]
pub trait WorkQueue<T: QueueItem>: Send + Sync {
    /// Mark `item` as needing processing. No-op if it is already pending or the
    /// queue is shutting down.
    fn add(&self, item: T);

    /// Wait for the next ready item and check it out.
    ///
    /// Returns `Err(QueueError::ShuttingDown)` once the queue is shut down and
    /// nothing is ready; callers should stop looping.
    async fn get(&self) -> Result<T, QueueError>;

    /// Like [`get`](WorkQueue::get) but gives up after `timeout`, returning
    /// `Ok(None)` so the caller can try again later.
    async fn poll(&self, timeout: Duration) -> Result<Option<T>, QueueError>;

    /// Finish processing `item`. If it was re-added meanwhile it becomes ready again.
    /// No-op unless `item` is currently checked out.
    fn done(&self, item: &T);

    /// Number of ready items. Items being processed are not counted.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting items and release waiting consumers. Idempotent.
    fn shutdown(&self);

    fn is_shutting_down(&self) -> bool;
}

#[derive(Debug)]
struct State<T> {
    ready: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    shutting_down: bool,
}

#[derive(Debug)]
struct Inner<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    config: QueueConfig,
}

/// In-process [`WorkQueue`]. Cloning yields another handle to the same queue.
#[derive(Debug)]
pub struct DefaultWorkQueue<T>(Arc<Inner<T>>);

impl<T> Clone for DefaultWorkQueue<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: QueueItem> Default for DefaultWorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: QueueItem> DefaultWorkQueue<T> {
    pub fn new() -> Self {
        Self::from_valid_config(QueueConfig::default())
    }

    /// Create a queue from `config`, rejecting a zero wait slice.
    pub fn with_config(config: QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: QueueConfig) -> Self {
        Self(Arc::new(Inner {
            state: Mutex::new(State {
                ready: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            config,
        }))
    }

    pub fn config(&self) -> &QueueConfig {
        &self.0.config
    }

    pub(crate) fn name(&self) -> &str {
        self.0.config.display_name()
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.0.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of items currently checked out.
    pub fn processing_len(&self) -> usize {
        self.lock().processing.len()
    }

    /// Pop the head of `ready` into `processing`, or report why nothing is available.
    fn try_take(&self) -> Result<Option<T>, QueueError> {
        let mut state = self.lock();
        if let Some(item) = state.ready.pop_front() {
            state.dirty.remove(&item);
            state.processing.insert(item.clone());
            trace!(queue = %self.name(), ?item, "item checked out");
            return Ok(Some(item));
        }
        if state.shutting_down {
            return Err(QueueError::ShuttingDown);
        }
        Ok(None)
    }

    /// Wait-and-recheck loop shared by `get` and `poll`. Each wait is bounded by
    /// the wait slice so shutdown is observed even if a wakeup is missed.
    async fn wait_for_item(&self, deadline: Option<Instant>) -> Result<Option<T>, QueueError> {
        loop {
            let notified = self.0.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_take()? {
                return Ok(Some(item));
            }

            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    (deadline - now).min(self.0.config.wait_slice)
                }
                None => self.0.config.wait_slice,
            };
            let _ = tokio::time::timeout(slice, notified).await;
        }
    }
}

#[async_trait]
impl<T: QueueItem> WorkQueue<T> for DefaultWorkQueue<T> {
    fn add(&self, item: T) {
        {
            let mut state = self.lock();
            if state.shutting_down {
                debug!(queue = %self.name(), ?item, "queue is shutting down, dropping add");
                return;
            }
            if state.dirty.contains(&item) {
                trace!(queue = %self.name(), ?item, "item already pending");
                return;
            }
            state.dirty.insert(item.clone());
            if state.processing.contains(&item) {
                debug!(queue = %self.name(), ?item, "item is processing, deferring until done");
                return;
            }
            state.ready.push_back(item);
        }
        self.0.notify.notify_one();
    }

    async fn get(&self) -> Result<T, QueueError> {
        match self.wait_for_item(None).await? {
            Some(item) => Ok(item),
            // Unbounded waits only return once an item or shutdown shows up.
            None => Err(QueueError::ShuttingDown),
        }
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<T>, QueueError> {
        // A timeout past the end of the clock waits without a deadline.
        self.wait_for_item(Instant::now().checked_add(timeout)).await
    }

    fn done(&self, item: &T) {
        {
            let mut state = self.lock();
            // Only the holder of a checked-out item may hand it back.
            if !state.processing.remove(item) || !state.dirty.contains(item) {
                return;
            }
            debug!(queue = %self.name(), ?item, "item re-added while processing, requeueing");
            state.ready.push_back(item.clone());
        }
        self.0.notify.notify_one();
    }

    fn len(&self) -> usize {
        self.lock().ready.len()
    }

    fn shutdown(&self) {
        {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            info!(queue = %self.name(), ready = state.ready.len(), "work queue shutting down");
        }
        self.0.notify.notify_waiters();
    }

    fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_dedups() {
        let queue = DefaultWorkQueue::new();
        queue.add("x".to_string());
        queue.add("x".to_string());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.unwrap(), "x");
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.poll(Duration::from_millis(10)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = DefaultWorkQueue::new();
        for item in ["a", "b", "c"] {
            queue.add(item);
        }
        assert_eq!(queue.get().await.unwrap(), "a");
        assert_eq!(queue.get().await.unwrap(), "b");
        assert_eq!(queue.get().await.unwrap(), "c");
    }

    #[tokio::test]
    async fn test_re_add_while_processing_waits_for_done() {
        let queue = DefaultWorkQueue::new();
        queue.add(1);
        let item = queue.get().await.unwrap();
        queue.add(item);
        // Not ready until the current holder finishes.
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.processing_len(), 1);
        queue.done(&item);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.processing_len(), 0);
        assert_eq!(queue.get().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_done_without_re_add_drops_item() {
        let queue = DefaultWorkQueue::new();
        queue.add(1);
        let item = queue.get().await.unwrap();
        queue.done(&item);
        assert!(queue.is_empty());
        assert_eq!(queue.processing_len(), 0);
    }

    #[tokio::test]
    async fn test_re_added_item_goes_to_the_back() {
        let queue = DefaultWorkQueue::new();
        queue.add("a");
        let a = queue.get().await.unwrap();
        queue.add("a");
        queue.add("b");
        queue.done(&a);
        assert_eq!(queue.get().await.unwrap(), "b");
        assert_eq!(queue.get().await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_get_wakes_on_add() {
        let queue = DefaultWorkQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.add(42);
        let item = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(item, 42);
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters_and_rejects_adds() {
        let queue: DefaultWorkQueue<u32> = DefaultWorkQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shutdown();
        queue.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(QueueError::ShuttingDown));

        queue.add(1);
        assert_eq!(queue.len(), 0);
        assert!(queue.is_shutting_down());
        assert_eq!(
            queue.poll(Duration::from_millis(10)).await,
            Err(QueueError::ShuttingDown)
        );
    }

    #[tokio::test]
    async fn test_shutdown_drains_ready_items_first() {
        let queue = DefaultWorkQueue::new();
        queue.add("a");
        queue.shutdown();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.unwrap(), "a");
        assert_eq!(queue.get().await, Err(QueueError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_done_only_requeues_checked_out_items() {
        let queue = DefaultWorkQueue::new();
        queue.add("x");
        let x = queue.get().await.unwrap();
        queue.add("x");
        queue.done(&x);
        queue.done(&x);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.unwrap(), "x");
        assert_eq!(queue.poll(Duration::from_millis(10)).await.unwrap(), None);
        assert_eq!(queue.processing_len(), 1);

        // Never checked out, so done leaves the pending item alone.
        queue.add("y");
        queue.done(&"y");
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_poll_with_unbounded_timeout() {
        let queue = DefaultWorkQueue::new();
        queue.add(1);
        assert_eq!(queue.poll(Duration::MAX).await.unwrap(), Some(1));

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.poll(Duration::MAX).await })
        };
        tokio::task::yield_now().await;
        queue.add(2);
        let polled = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(polled, Ok(Some(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_with_none() {
        let queue: DefaultWorkQueue<u32> = DefaultWorkQueue::new();
        let start = Instant::now();
        assert_eq!(queue.poll(Duration::from_millis(250)).await.unwrap(), None);
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_zero_wait_slice() {
        let config = QueueConfig::default().with_wait_slice(Duration::ZERO);
        assert!(matches!(
            DefaultWorkQueue::<u32>::with_config(config),
            Err(QueueError::InvalidArgument(_))
        ));
    }
}
