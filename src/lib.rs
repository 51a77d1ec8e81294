//! # Requeue - work queues for reconciliation controllers
//!
//! A controller watches for changes, drops the key of whatever changed onto a
//! queue, and a pool of workers reconciles each key. This crate provides the
//! queue half of that loop:
//!
//! - deduplication, so a key queued many times is processed once
//! - exclusive processing, so no two workers hold the same key
//! - delayed adds, for "look at this again in 30 seconds"
//! - rate-limited adds, so failing keys back off per item and overall
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! requeue = "0.3.0"
//! ```
//!
//! ```rust,ignore
//! use requeue::core::{factory, RateLimitingWorkQueue, WorkQueue};
//!
//! let queue = factory::controller_queue::<String>()?;
//! queue.add("default/web".to_string());
//! let key = queue.get().await?;
//! // reconcile, then on failure:
//! queue.add_rate_limited(key.clone());
//! queue.done(&key);
//! ```

/// Initialize logging with default settings.
///
/// Installs a `tracing` subscriber that honours `RUST_LOG`, falling back to
/// `info`. Calling it more than once is harmless.
pub fn init() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// Re-export the core crate
pub use requeue_core as core;

pub use requeue_core::{
    factory, ControllerRateLimiterConfig, DefaultDelayingQueue, DefaultRateLimitingQueue,
    DefaultWorkQueue, DelayingWorkQueue, QueueConfig, QueueError, QueueItem, RateLimiter,
    RateLimitingWorkQueue, Reconciler, WorkQueue, Worker, WorkerConfig, WorkerStats,
};
