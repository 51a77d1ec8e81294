use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::RateLimiter;
use crate::error::QueueError;
use crate::QueueItem;

/// Retries quickly for the first `max_fast_attempts` failures of an item, then slowly.
#[derive(Debug)]
pub struct FastSlowRateLimiter<T> {
    fast_delay: Duration,
    slow_delay: Duration,
    max_fast_attempts: usize,
    attempts: Mutex<HashMap<T, usize>>,
}

impl<T: QueueItem> FastSlowRateLimiter<T> {
    pub fn new(
        fast_delay: Duration,
        slow_delay: Duration,
        max_fast_attempts: usize,
    ) -> Result<Self, QueueError> {
        if fast_delay > slow_delay {
            return Err(QueueError::invalid(format!(
                "fast delay {fast_delay:?} exceeds slow delay {slow_delay:?}"
            )));
        }
        Ok(Self {
            fast_delay,
            slow_delay,
            max_fast_attempts,
            attempts: Mutex::new(HashMap::new()),
        })
    }
}

impl<T: QueueItem> RateLimiter<T> for FastSlowRateLimiter<T> {
    fn when(&self, item: &T) -> Duration {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let count = attempts.entry(item.clone()).or_insert(0);
        *count += 1;
        if *count <= self.max_fast_attempts {
            self.fast_delay
        } else {
            self.slow_delay
        }
    }

    fn forget(&self, item: &T) {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(item);
    }

    fn num_requeues(&self, item: &T) -> usize {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(item)
            .copied()
            .unwrap_or(0)
    }
}
