//! Deduplicating, delayable, rate-limited work queues for reconciliation-style
//! controllers.
//!
//! Layers, from the bottom up:
//!
//! - [`DefaultWorkQueue`]: FIFO that never holds an item twice and never hands
//!   the same item to two consumers at once.
//! - [`DefaultDelayingQueue`]: adds [`DelayingWorkQueue::add_after`], where the
//!   latest deadline for an item replaces any earlier one.
//! - [`DefaultRateLimitingQueue`]: adds
//!   [`RateLimitingWorkQueue::add_rate_limited`], delaying retries by whatever a
//!   [`RateLimiter`] decides.
//! - [`Worker`]: a pool of consumer loops running a [`Reconciler`].
//!
//! The queues do no I/O and persist nothing.

pub mod config;
pub mod delaying;
pub mod error;
pub mod factory;
pub mod queue;
pub mod rate_limiter;
pub mod rate_limiting;
pub mod worker;

#[cfg(test)]
mod tests;

use std::fmt::Debug;
use std::hash::Hash;

pub use config::{ControllerRateLimiterConfig, QueueConfig, WorkerConfig};
pub use delaying::{DefaultDelayingQueue, DelayingWorkQueue};
pub use error::QueueError;
pub use queue::{DefaultWorkQueue, WorkQueue};
pub use rate_limiter::{
    BucketRateLimiter, ExponentialBackoffRateLimiter, FastSlowRateLimiter, MaxOfRateLimiter,
    RateLimiter,
};
pub use rate_limiting::{DefaultRateLimitingQueue, RateLimitingWorkQueue};
pub use worker::{Reconciler, Worker, WorkerStats};

/// Bound for anything placed on a queue.
///
/// Deduplication is by value: two items are the same work if they are `Eq`
/// and hash alike, so the `Hash` impl must be stable for an item's lifetime
/// in the queue.
pub trait QueueItem: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> QueueItem for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}
