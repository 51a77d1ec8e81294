//! Retry pacing policies.
//!
//! A [`RateLimiter`] decides how long a failed item has to wait before it is
//! handed out again, and keeps the per-item bookkeeping that decision depends on.
//! Limiters are plain synchronous objects: they never sleep, they only compute.

use std::sync::Arc;
use std::time::Duration;

mod bucket;
mod exponential;
mod fast_slow;
mod max_of;

pub use bucket::BucketRateLimiter;
pub use exponential::ExponentialBackoffRateLimiter;
pub use fast_slow::FastSlowRateLimiter;
pub use max_of::MaxOfRateLimiter;

/// Strategy computing a retry delay per item.
pub trait RateLimiter<T>: Send + Sync {
    /// Record one more failure of `item` and return how long it should wait.
    fn when(&self, item: &T) -> Duration;

    /// Drop all bookkeeping for `item`; its next failure counts as the first.
    fn forget(&self, item: &T);

    /// Number of failures recorded for `item` since the last `forget`.
    fn num_requeues(&self, item: &T) -> usize;
}

impl<T, L> RateLimiter<T> for Arc<L>
where
    L: RateLimiter<T> + ?Sized,
{
    fn when(&self, item: &T) -> Duration {
        (**self).when(item)
    }

    fn forget(&self, item: &T) {
        (**self).forget(item)
    }

    fn num_requeues(&self, item: &T) -> usize {
        (**self).num_requeues(item)
    }
}

impl<T, L> RateLimiter<T> for Box<L>
where
    L: RateLimiter<T> + ?Sized,
{
    fn when(&self, item: &T) -> Duration {
        (**self).when(item)
    }

    fn forget(&self, item: &T) {
        (**self).forget(item)
    }

    fn num_requeues(&self, item: &T) -> usize {
        (**self).num_requeues(item)
    }
}
