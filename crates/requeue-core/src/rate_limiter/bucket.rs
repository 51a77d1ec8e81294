use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::RateLimiter;
use crate::error::QueueError;
use crate::QueueItem;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Global token bucket shared by every item.
///
/// Admission depends only on the bucket: each `when` call refills it for the
/// time elapsed since the previous call and then takes one token, or reports
/// how long until a whole token would be available. The per-item counters are
/// kept for [`RateLimiter::num_requeues`] and never influence the delay, and
/// `forget` does not hand tokens back.
#[derive(Debug)]
pub struct BucketRateLimiter<T> {
    rate: f64,
    burst: usize,
    bucket: Mutex<Bucket>,
    requeues: Mutex<HashMap<T, usize>>,
}

impl<T: QueueItem> BucketRateLimiter<T> {
    /// Create a full bucket refilled at `tokens_per_second` holding at most `burst` tokens.
    pub fn new(tokens_per_second: f64, burst: usize) -> Result<Self, QueueError> {
        if !tokens_per_second.is_finite() || tokens_per_second <= 0.0 {
            return Err(QueueError::invalid(format!(
                "tokens_per_second must be positive, got {tokens_per_second}"
            )));
        }
        if burst == 0 {
            return Err(QueueError::invalid("burst must be positive"));
        }
        Ok(Self::new_unchecked(tokens_per_second, burst))
    }

    pub(crate) fn new_unchecked(tokens_per_second: f64, burst: usize) -> Self {
        Self {
            rate: tokens_per_second,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
            requeues: Mutex::new(HashMap::new()),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> usize {
        self.burst
    }

    /// Tokens currently in the bucket, without refilling it.
    pub fn available_tokens(&self) -> f64 {
        self.bucket.lock().unwrap_or_else(|e| e.into_inner()).tokens
    }

    fn take(&self) -> Duration {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let capacity = self.burst as f64;
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(capacity);
        bucket.last_refill = now;
        debug_assert!(
            (0.0..=capacity).contains(&bucket.tokens),
            "token count {} outside [0, {}]",
            bucket.tokens,
            capacity
        );

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Duration::ZERO;
        }
        let deficit_secs = (1.0 - bucket.tokens) / self.rate;
        bucket.tokens = 0.0;
        Duration::from_millis((deficit_secs * 1000.0).ceil() as u64)
    }
}

impl<T: QueueItem> RateLimiter<T> for BucketRateLimiter<T> {
    fn when(&self, item: &T) -> Duration {
        *self
            .requeues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(item.clone())
            .or_insert(0) += 1;
        self.take()
    }

    fn forget(&self, item: &T) {
        self.requeues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(item);
    }

    fn num_requeues(&self, item: &T) -> usize {
        self.requeues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(item)
            .copied()
            .unwrap_or(0)
    }
}
