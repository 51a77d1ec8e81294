//! Work queue with delayed adds.
//!
//! Each delayed add is a timer task on a tokio runtime. There is at most one
//! pending timer per item: scheduling an item again cancels the previous timer,
//! so the latest deadline wins. The pending-timer map is guarded by one lock
//! that every install, cancel, fire and shutdown goes through, and a fired
//! timer re-checks its token under that lock before adding.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::queue::{DefaultWorkQueue, WorkQueue};
use crate::QueueItem;

/// A [`WorkQueue`] that can also add items after a delay.
pub trait DelayingWorkQueue<T: QueueItem>: WorkQueue<T> {
    /// Make `item` ready after `delay`. A zero delay adds immediately; a pending
    /// delayed add of the same item is replaced.
    fn add_after(&self, item: T, delay: Duration);
}

type Timers<T> = Arc<Mutex<HashMap<T, CancellationToken>>>;

/// In-process [`DelayingWorkQueue`] backed by a [`DefaultWorkQueue`].
#[derive(Debug)]
pub struct DefaultDelayingQueue<T> {
    queue: DefaultWorkQueue<T>,
    timers: Timers<T>,
    handle: Handle,
}

impl<T> Clone for DefaultDelayingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            timers: self.timers.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<T: QueueItem> DefaultDelayingQueue<T> {
    /// Create a queue whose timers run on the current tokio runtime.
    pub fn new() -> Result<Self, QueueError> {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Result<Self, QueueError> {
        let handle = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        Ok(Self::with_handle(DefaultWorkQueue::with_config(config)?, handle))
    }

    /// Wrap an existing queue, scheduling timers on `handle`.
    pub fn with_handle(queue: DefaultWorkQueue<T>, handle: Handle) -> Self {
        Self {
            queue,
            timers: Arc::new(Mutex::new(HashMap::new())),
            handle,
        }
    }

    /// Number of delayed adds that have not fired yet.
    pub fn pending_timers(&self) -> usize {
        lock(&self.timers).len()
    }

    /// The underlying queue.
    pub fn inner(&self) -> &DefaultWorkQueue<T> {
        &self.queue
    }

    fn schedule(&self, item: T, delay: Duration) {
        let token = CancellationToken::new();
        {
            let mut timers = lock(&self.timers);
            // Checked under the timers lock; shutdown flips the flag while holding it.
            if self.queue.is_shutting_down() {
                debug!(queue = %self.queue.name(), ?item, "queue is shutting down, dropping delayed add");
                return;
            }
            if let Some(previous) = timers.insert(item.clone(), token.clone()) {
                previous.cancel();
                debug!(queue = %self.queue.name(), ?item, ?delay, "replaced pending delayed add");
            } else {
                trace!(queue = %self.queue.name(), ?item, ?delay, "scheduled delayed add");
            }
        }

        let timers = self.timers.clone();
        let queue = self.queue.clone();
        self.handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let mut pending = lock(&timers);
            if token.is_cancelled() {
                return;
            }
            // Not cancelled, so the map entry for this item is ours.
            pending.remove(&item);
            trace!(queue = %queue.name(), ?item, "delayed add fired");
            queue.add(item);
        });
    }
}

fn lock<T>(timers: &Timers<T>) -> MutexGuard<'_, HashMap<T, CancellationToken>> {
    timers.lock().unwrap_or_else(|e| e.into_inner())
}

impl<T: QueueItem> DelayingWorkQueue<T> for DefaultDelayingQueue<T> {
    fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            // An immediate add supersedes any pending delayed add.
            let mut timers = lock(&self.timers);
            if let Some(previous) = timers.remove(&item) {
                previous.cancel();
                debug!(queue = %self.queue.name(), ?item, "cancelled pending delayed add");
            }
            self.queue.add(item);
            return;
        }
        self.schedule(item, delay);
    }
}

#[async_trait]
impl<T: QueueItem> WorkQueue<T> for DefaultDelayingQueue<T> {
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
        let mut timers = lock(&self.timers);
        let cancelled = timers.len();
        for (_, token) in timers.drain() {
            token.cancel();
        }
        if cancelled > 0 {
            debug!(queue = %self.queue.name(), cancelled, "cancelled pending delayed adds");
        }
        self.queue.shutdown();
    }

    fn is_shutting_down(&self) -> bool {
        self.queue.is_shutting_down()
    }
}
