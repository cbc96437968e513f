// Copyright (c) 2025 - Cowboy AI, Inc.
//! Stream Events
//!
//! An [`Event<T>`] is one notification on a subscription. A well-formed
//! sequence is zero or more `Next` values followed by at most one terminal
//! event:
//!
//! ```text
//! Next* (Error | Complete)?
//! ```
//!
//! Recorded sequences pair each event with the scheduler time it was seen
//! at, giving the discrete occurrence model used by the test harness:
//!
//! ```text
//! Recording<T> ≅ [(Duration, Event<T>)]
//! ```

use crate::errors::StreamError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single notification delivered to an observer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Event<T> {
    /// A value
    Next(T),
    /// Terminal failure
    Error(StreamError),
    /// Terminal success
    Complete,
}

/// An event observed at a point in (possibly virtual) time
pub type Occurrence<T> = (Duration, Event<T>);

impl<T> Event<T> {
    /// Whether this event ends the sequence
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Event::Next(_))
    }

    /// Whether this event carries a value
    pub fn is_next(&self) -> bool {
        matches!(self, Event::Next(_))
    }

    /// Extract the value of a `Next` event
    pub fn into_next(self) -> Option<T> {
        match self {
            Event::Next(value) => Some(value),
            _ => None,
        }
    }

    /// Borrow the value of a `Next` event
    pub fn as_next(&self) -> Option<&T> {
        match self {
            Event::Next(value) => Some(value),
            _ => None,
        }
    }

    /// Map the carried value, leaving terminals untouched
    pub fn map<U, F>(self, f: F) -> Event<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Event::Next(value) => Event::Next(f(value)),
            Event::Error(error) => Event::Error(error),
            Event::Complete => Event::Complete,
        }
    }
}

/// How a sequence ended
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Terminal {
    Complete,
    Error(StreamError),
}

impl Terminal {
    pub(crate) fn into_event<T>(self) -> Event<T> {
        match self {
            Terminal::Complete => Event::Complete,
            Terminal::Error(error) => Event::Error(error),
        }
    }
}

/// A value stamped with the wall-clock time it passed through `timestamp()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timestamped<T> {
    pub value: T,
    pub timestamp: DateTime<Utc>,
}

/// A value paired with the scheduler time elapsed since the previous one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeInterval<T> {
    pub value: T,
    pub interval: Duration,
}
