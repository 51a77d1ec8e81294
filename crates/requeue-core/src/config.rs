//! Configuration for queues, the default controller rate limiter and workers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::QueueError;
use crate::rate_limiter::{
    BucketRateLimiter, ExponentialBackoffRateLimiter, MaxOfRateLimiter, RateLimiter,
};
use crate::QueueItem;

/// Default slice a waiting `get()` sleeps before re-checking for shutdown.
pub const DEFAULT_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Configuration for a work queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Name attached to the queue's tracing events.
    pub name: Option<String>,
    /// Upper bound on how long a waiter sleeps between state re-checks.
    pub wait_slice: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: None,
            wait_slice: DEFAULT_WAIT_SLICE,
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the wait slice.
    pub fn with_wait_slice(mut self, wait_slice: Duration) -> Self {
        self.wait_slice = wait_slice;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), QueueError> {
        if self.wait_slice.is_zero() {
            return Err(QueueError::invalid("wait_slice must be greater than zero"));
        }
        Ok(())
    }

    pub(crate) fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}

/// Parameters of the default controller rate limiter: per-item exponential
/// backoff capped by a global token bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerRateLimiterConfig {
    /// Delay after the first failure of an item.
    pub base_delay: Duration,
    /// Ceiling for the per-item backoff.
    pub max_delay: Duration,
    /// Tokens added to the global bucket per second.
    pub qps: f64,
    /// Capacity of the global bucket.
    pub burst: usize,
}

impl Default for ControllerRateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            qps: 10.0,
            burst: 100,
        }
    }
}

impl ControllerRateLimiterConfig {
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_qps(mut self, qps: f64) -> Self {
        self.qps = qps;
        self
    }

    pub fn with_burst(mut self, burst: usize) -> Self {
        self.burst = burst;
        self
    }

    /// Build the limiter, validating every parameter.
    pub fn build<T: QueueItem>(&self) -> Result<MaxOfRateLimiter<T>, QueueError> {
        let backoff = ExponentialBackoffRateLimiter::new(self.base_delay, self.max_delay)?;
        let bucket = BucketRateLimiter::new(self.qps, self.burst)?;
        MaxOfRateLimiter::new(vec![
            Box::new(backoff) as Box<dyn RateLimiter<T>>,
            Box::new(bucket),
        ])
    }
}

/// Configuration for a [`Worker`](crate::worker::Worker) pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent consumer loops.
    pub workers: usize,
    /// How long a loop waits for an item before checking for cancellation.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl WorkerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), QueueError> {
        if self.workers == 0 {
            return Err(QueueError::invalid("workers must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(QueueError::invalid("poll_interval must be greater than zero"));
        }
        Ok(())
    }
}
