//! Errors returned by queue constructors and consumers.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// A constructor was given arguments it cannot work with.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The queue has been shut down and holds no more ready items.
    #[error("Queue is shutting down")]
    ShuttingDown,
    /// A delaying queue needs a tokio runtime to schedule its timers.
    #[error("No tokio runtime available to schedule delayed adds")]
    NoRuntime,
}

impl QueueError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        QueueError::InvalidArgument(msg.into())
    }
}
