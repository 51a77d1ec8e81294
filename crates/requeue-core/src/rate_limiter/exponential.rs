use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::RateLimiter;
use crate::error::QueueError;
use crate::QueueItem;

/// Largest exponent applied to the base delay.
const MAX_EXPONENT: u32 = 62;

/// Per-item exponential backoff: `base * 2^(failures - 1)`, capped at `max`.
#[derive(Debug)]
pub struct ExponentialBackoffRateLimiter<T> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<T, usize>>,
}

impl<T: QueueItem> ExponentialBackoffRateLimiter<T> {
    /// Create a limiter; `base` must not exceed `max`.
    pub fn new(base: Duration, max: Duration) -> Result<Self, QueueError> {
        if base > max {
            return Err(QueueError::invalid(format!(
                "base delay {base:?} exceeds max delay {max:?}"
            )));
        }
        Ok(Self::new_unchecked(base, max))
    }

    pub(crate) fn new_unchecked(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay for the `n`-th consecutive failure (1-based).
    pub fn backoff_duration(&self, n: usize) -> Duration {
        if n <= 1 {
            return self.base;
        }
        let exp = (n - 1).min(MAX_EXPONENT as usize) as u32;
        let scaled = match self.base.as_nanos().checked_mul(1u128 << exp) {
            Some(nanos) => nanos,
            None => return self.max,
        };
        if scaled >= self.max.as_nanos() {
            return self.max;
        }
        // Below max, so it fits in a Duration.
        Duration::new(
            (scaled / 1_000_000_000) as u64,
            (scaled % 1_000_000_000) as u32,
        )
    }
}

impl<T: QueueItem> RateLimiter<T> for ExponentialBackoffRateLimiter<T> {
    fn when(&self, item: &T) -> Duration {
        let n = {
            let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
            let count = failures.entry(item.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.backoff_duration(n)
    }

    fn forget(&self, item: &T) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(item);
    }

    fn num_requeues(&self, item: &T) -> usize {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(item)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_sequence() {
        let limiter = ExponentialBackoffRateLimiter::new(
            Duration::from_millis(5),
            Duration::from_millis(1_000_000),
        )
        .unwrap();
        let item = "one".to_string();
        let delays: Vec<_> = (0..5).map(|_| limiter.when(&item)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(5),
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40),
                Duration::from_millis(80),
            ]
        );
        assert_eq!(limiter.num_requeues(&item), 5);
    }

    #[test]
    fn test_saturates_at_max() {
        let limiter =
            ExponentialBackoffRateLimiter::new(Duration::from_millis(1), Duration::from_secs(1))
                .unwrap();
        let item = 7u32;
        for _ in 0..10 {
            limiter.when(&item);
        }
        // 2^10 ms > 1s
        assert_eq!(limiter.when(&item), Duration::from_secs(1));
        for _ in 0..200 {
            assert!(limiter.when(&item) <= Duration::from_secs(1));
        }
        assert_eq!(limiter.when(&item), Duration::from_secs(1));
    }

    #[test]
    fn test_overflow_falls_back_to_max() {
        let max = Duration::MAX;
        let limiter =
            ExponentialBackoffRateLimiter::<u32>::new(Duration::from_secs(1 << 40), max).unwrap();
        // 2^40 s in nanoseconds times 2^62 overflows the u128 product.
        assert_eq!(limiter.backoff_duration(100), max);
        assert_eq!(limiter.backoff_duration(2), Duration::from_secs(1 << 41));
    }

    #[test]
    fn test_items_are_independent() {
        let limiter = ExponentialBackoffRateLimiter::new(
            Duration::from_millis(5),
            Duration::from_secs(10),
        )
        .unwrap();
        limiter.when(&"a");
        limiter.when(&"a");
        assert_eq!(limiter.when(&"b"), Duration::from_millis(5));
        assert_eq!(limiter.num_requeues(&"a"), 2);
        assert_eq!(limiter.num_requeues(&"b"), 1);
    }

    #[test]
    fn test_forget_restarts_backoff() {
        let limiter = ExponentialBackoffRateLimiter::new(
            Duration::from_millis(5),
            Duration::from_secs(10),
        )
        .unwrap();
        limiter.when(&"a");
        limiter.when(&"a");
        assert!(limiter.num_requeues(&"a") > 0);
        limiter.forget(&"a");
        assert_eq!(limiter.num_requeues(&"a"), 0);
        assert_eq!(limiter.when(&"a"), Duration::from_millis(5));
    }

    #[test]
    fn test_rejects_base_above_max() {
        let err = ExponentialBackoffRateLimiter::<String>::new(
            Duration::from_secs(2),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, QueueError::InvalidArgument(_)));
        assert!(ExponentialBackoffRateLimiter::<String>::new(Duration::ZERO, Duration::ZERO).is_ok());
    }
}
