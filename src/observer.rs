// Copyright (c) 2025 - Cowboy AI, Inc.
//! Observers
//!
//! An [`Observer`] is the consumer-facing capability set of the runtime: three
//! callbacks invoked strictly in order for one subscription.
//!
//! ```text
//!   Source ──Next──Next──Next──Complete──▶ Observer
//!                                 │
//!                       on_next / on_error / on_complete
//! ```
//!
//! The runtime guarantees for every observer that:
//! 1. **Serial**: callbacks never overlap
//! 2. **Terminal once**: at most one of `on_error` / `on_complete`
//! 3. **Silent after dispose**: nothing arrives once the subscription is disposed
//!
//! # Example
//!
//! ```rust,ignore
//! use cim_reactive::observer::*;
//!
//! let subscription = Observable::range(1, 3).subscribe(FnObserver::new(
//!     |v| println!("next {v}"),
//!     |e| eprintln!("failed: {e}"),
//!     || println!("done"),
//! ));
//! ```

use crate::errors::StreamError;
use std::fmt::Debug;
use tracing::{error, info};

/// Receiver of stream events
pub trait Observer<T>: Send {
    /// A value arrived
    fn on_next(&mut self, value: T);

    /// The stream failed; no further calls follow
    fn on_error(&mut self, error: StreamError);

    /// The stream finished; no further calls follow
    fn on_complete(&mut self);
}

/// Observer assembled from three closures
pub struct FnObserver<N, E, C> {
    next: N,
    error: E,
    complete: C,
}

impl<N, E, C> FnObserver<N, E, C> {
    /// Create an observer from next, error and completion handlers
    ///
    /// The error handler is mandatory; use [`crate::Observable::subscribe_next`]
    /// to subscribe with only a value handler and have failures logged.
    pub fn new(next: N, error: E, complete: C) -> Self {
        Self {
            next,
            error,
            complete,
        }
    }
}

impl<T, N, E, C> Observer<T> for FnObserver<N, E, C>
where
    N: FnMut(T) + Send,
    E: FnMut(StreamError) + Send,
    C: FnMut() + Send,
{
    fn on_next(&mut self, value: T) {
        (self.next)(value)
    }

    fn on_error(&mut self, error: StreamError) {
        (self.error)(error)
    }

    fn on_complete(&mut self) {
        (self.complete)()
    }
}

/// Value-only observer whose failures are reported as unhandled
pub(crate) struct NextObserver<N> {
    next: N,
}

impl<N> NextObserver<N> {
    pub(crate) fn new(next: N) -> Self {
        Self { next }
    }
}

impl<T, N> Observer<T> for NextObserver<N>
where
    N: FnMut(T) + Send,
{
    fn on_next(&mut self, value: T) {
        (self.next)(value)
    }

    fn on_error(&mut self, err: StreamError) {
        error!(error = %err, "unhandled stream error: subscribe with an error handler");
    }

    fn on_complete(&mut self) {}
}

/// Display sink - logs every event under a tag
///
/// The stream equivalent of printing results: each callback becomes an
/// `info!` record carrying the tag, so several pipelines can share a log.
#[derive(Debug, Clone)]
pub struct LoggingObserver {
    tag: String,
    seen: usize,
}

impl LoggingObserver {
    /// Create a logging observer
    ///
    /// # Arguments
    ///
    /// * `tag` - Label attached to every log record
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            seen: 0,
        }
    }

    /// Number of values logged so far
    pub fn seen(&self) -> usize {
        self.seen
    }
}

impl<T: Debug> Observer<T> for LoggingObserver {
    fn on_next(&mut self, value: T) {
        self.seen += 1;
        info!(tag = %self.tag, value = ?value, "next");
    }

    fn on_error(&mut self, err: StreamError) {
        error!(tag = %self.tag, error = %err, "error");
    }

    fn on_complete(&mut self) {
        info!(tag = %self.tag, values = self.seen, "complete");
    }
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl<T> Observer<T> for NullObserver {
    fn on_next(&mut self, _value: T) {}

    fn on_error(&mut self, _error: StreamError) {}

    fn on_complete(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_fn_observer_routes_callbacks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (log.clone(), log.clone(), log.clone());
        let mut observer = FnObserver::new(
            move |v: i32| a.lock().unwrap().push(format!("next {v}")),
            move |e: StreamError| b.lock().unwrap().push(format!("error {e}")),
            move || c.lock().unwrap().push("complete".to_string()),
        );

        observer.on_next(1);
        observer.on_error(StreamError::source("x"));
        observer.on_complete();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["next 1", "error Source error: x", "complete"]
        );
    }

    #[test]
    fn test_logging_observer_counts() {
        let mut observer = LoggingObserver::new("numbers");
        Observer::<i32>::on_next(&mut observer, 1);
        Observer::<i32>::on_next(&mut observer, 2);
        Observer::<i32>::on_complete(&mut observer);
        assert_eq!(observer.seen(), 2);
    }
}
