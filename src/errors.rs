//! Error types for reactive stream operations

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;

/// Errors that can terminate a stream
///
/// Every variant is `Clone` because a single upstream failure is fanned out
/// to each subscriber of a hot source.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StreamError {
    /// A user supplied transform returned an error
    #[error("Transform error: {0}")]
    Transform(String),

    /// A bounded buffer under the error policy overflowed
    #[error("Backpressure overflow: buffer capacity {capacity} exceeded")]
    BackpressureOverflow { capacity: usize },

    /// No event arrived inside the configured window
    #[error("Timeout: no event within {0:?}")]
    Timeout(Duration),

    /// Operation observed after disposal
    ///
    /// Never delivered to an observer; subscribers drop it silently.
    #[error("Cancelled: operation observed after disposal")]
    Cancelled,

    /// Error raised by a user source
    #[error("Source error: {0}")]
    Source(String),

    /// A scheduled task panicked
    #[error("Scheduled task failed: {0}")]
    TaskFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A stream held a different number of values than its operator needs
    #[error("Unexpected element count: {0}")]
    ElementCount(String),
}

/// Result type for stream operations
pub type StreamResult<T> = Result<T, StreamError>;

impl StreamError {
    /// Wrap a transform failure
    pub fn transform(err: impl Display) -> Self {
        StreamError::Transform(err.to_string())
    }

    /// Wrap a failure raised by a source
    pub fn source(err: impl Display) -> Self {
        StreamError::Source(err.to_string())
    }

    /// Whether this error only signals disposal
    pub fn is_cancellation(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }
}

impl From<std::num::ParseIntError> for StreamError {
    fn from(err: std::num::ParseIntError) -> Self {
        StreamError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Configuration(err.to_string())
    }
}

impl From<tokio::sync::AcquireError> for StreamError {
    fn from(_: tokio::sync::AcquireError) -> Self {
        StreamError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StreamError::BackpressureOverflow { capacity: 2 };
        assert_eq!(
            err.to_string(),
            "Backpressure overflow: buffer capacity 2 exceeded"
        );

        let err = StreamError::transform("boom");
        assert_eq!(err.to_string(), "Transform error: boom");
    }

    #[test]
    fn test_cancellation_detection() {
        assert!(StreamError::Cancelled.is_cancellation());
        assert!(!StreamError::source("x").is_cancellation());
    }

    #[test]
    fn test_parse_error_becomes_configuration() {
        let err: StreamError = "nope".parse::<usize>().unwrap_err().into();
        assert!(matches!(err, StreamError::Configuration(_)));
    }
}
