//! Preconfigured constructors.
//!
//! The delaying and rate-limiting variants schedule timers on the tokio runtime
//! current at construction and fail with [`QueueError::NoRuntime`] outside one;
//! use [`delaying_queue_with_handle`] to pick the runtime explicitly.

use std::time::Duration;
use tokio::runtime::Handle;

use crate::config::{ControllerRateLimiterConfig, QueueConfig};
use crate::delaying::DefaultDelayingQueue;
use crate::error::QueueError;
use crate::queue::DefaultWorkQueue;
use crate::rate_limiter::{
    BucketRateLimiter, ExponentialBackoffRateLimiter, MaxOfRateLimiter, RateLimiter,
};
use crate::rate_limiting::DefaultRateLimitingQueue;
use crate::QueueItem;

/// Plain deduplicating queue.
pub fn work_queue<T: QueueItem>() -> DefaultWorkQueue<T> {
    DefaultWorkQueue::new()
}

pub fn work_queue_with_config<T: QueueItem>(
    config: QueueConfig,
) -> Result<DefaultWorkQueue<T>, QueueError> {
    DefaultWorkQueue::with_config(config)
}

/// Delaying queue on the current runtime.
pub fn delaying_queue<T: QueueItem>() -> Result<DefaultDelayingQueue<T>, QueueError> {
    DefaultDelayingQueue::new()
}

pub fn delaying_queue_with_config<T: QueueItem>(
    config: QueueConfig,
) -> Result<DefaultDelayingQueue<T>, QueueError> {
    DefaultDelayingQueue::with_config(config)
}

/// Delaying queue whose timers run on `handle`.
pub fn delaying_queue_with_handle<T: QueueItem>(handle: Handle) -> DefaultDelayingQueue<T> {
    DefaultDelayingQueue::with_handle(DefaultWorkQueue::new(), handle)
}

/// Rate-limiting queue on the current runtime, paced by `limiter`.
pub fn rate_limiting_queue<T: QueueItem>(
    limiter: impl RateLimiter<T> + 'static,
) -> Result<DefaultRateLimitingQueue<T>, QueueError> {
    DefaultRateLimitingQueue::new(limiter)
}

pub fn rate_limiting_queue_with_config<T: QueueItem>(
    config: QueueConfig,
    limiter: impl RateLimiter<T> + 'static,
) -> Result<DefaultRateLimitingQueue<T>, QueueError> {
    DefaultRateLimitingQueue::with_config(config, limiter)
}

/// Rate-limiting queue using [`controller_rate_limiter`].
pub fn controller_queue<T: QueueItem>() -> Result<DefaultRateLimitingQueue<T>, QueueError> {
    DefaultRateLimitingQueue::new(controller_rate_limiter::<T>())
}

/// Per-item exponential backoff from 5ms to 1000s, capped overall by a
/// 10 qps token bucket with a burst of 100.
pub fn controller_rate_limiter<T: QueueItem>() -> MaxOfRateLimiter<T> {
    // Defaults are known to be valid.
    let defaults = ControllerRateLimiterConfig::default();
    let backoff =
        ExponentialBackoffRateLimiter::new_unchecked(defaults.base_delay, defaults.max_delay);
    let bucket = BucketRateLimiter::new_unchecked(defaults.qps, defaults.burst);
    MaxOfRateLimiter::new_unchecked(vec![
        Box::new(backoff) as Box<dyn RateLimiter<T>>,
        Box::new(bucket),
    ])
}

pub fn exponential_backoff<T: QueueItem>(
    base: Duration,
    max: Duration,
) -> Result<ExponentialBackoffRateLimiter<T>, QueueError> {
    ExponentialBackoffRateLimiter::new(base, max)
}

pub fn bucket<T: QueueItem>(
    tokens_per_second: f64,
    burst: usize,
) -> Result<BucketRateLimiter<T>, QueueError> {
    BucketRateLimiter::new(tokens_per_second, burst)
}
