// Copyright (c) 2025 - Cowboy AI, Inc.
//! Backpressure
//!
//! Demand negotiation between fast producers and slow consumers.
//!
//! ```text
//!   Producer ──values──▶ [ bounded buffer ] ──values──▶ Consumer
//!       ▲                                                   │
//!       └──────────────── request(n) ◀──────────────────────┘
//! ```
//!
//! Three ways in:
//!
//! 1. [`Flowable`]: demand-aware sources that never emit more `Next` events
//!    than the consumer requested.
//! 2. [`crate::Observable::on_backpressure`]: adapts a push source that
//!    cannot be slowed down, applying a [`BackpressureStrategy`] when the
//!    consumer falls behind.
//! 3. [`demand_channel`]: cooperative async channel where the producer
//!    suspends until the consumer asks for more. The only mode with zero
//!    drops and bounded memory.

pub mod buffer;
pub mod channel;
pub mod demand;
pub mod flowable;
pub mod stream;

pub use channel::{demand_channel, DemandHandler, DemandReceiver, DemandSender};
pub use demand::{Demand, Producer};
pub use flowable::{FlowObserver, Flowable};
pub use stream::FlowStream;

use crate::config::RuntimeConfig;
use crate::errors::StreamError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What to do with a value that arrives while the consumer has no demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackpressureStrategy {
    /// Buffer without bound
    #[default]
    Buffer,
    /// Fail with `BackpressureOverflow` once the buffer is full
    Error,
    /// Evict the oldest buffered value to make room
    DropOldest,
    /// Evict the most recently buffered value to make room
    DropLatest,
    /// Discard the arriving value unless there is outstanding demand
    Drop,
    /// Keep only the most recent unconsumed value
    Latest,
}

impl BackpressureStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackpressureStrategy::Buffer => "buffer",
            BackpressureStrategy::Error => "error",
            BackpressureStrategy::DropOldest => "drop-oldest",
            BackpressureStrategy::DropLatest => "drop-latest",
            BackpressureStrategy::Drop => "drop",
            BackpressureStrategy::Latest => "latest",
        }
    }
}

impl fmt::Display for BackpressureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackpressureStrategy {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buffer" | "unbounded" => Ok(BackpressureStrategy::Buffer),
            "error" => Ok(BackpressureStrategy::Error),
            "drop-oldest" => Ok(BackpressureStrategy::DropOldest),
            "drop-latest" => Ok(BackpressureStrategy::DropLatest),
            "drop" => Ok(BackpressureStrategy::Drop),
            "latest" => Ok(BackpressureStrategy::Latest),
            other => Err(StreamError::Configuration(format!(
                "unknown backpressure strategy: {other}"
            ))),
        }
    }
}

/// Capacity plus overflow policy for [`crate::Observable::on_backpressure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackpressureConfig {
    /// Maximum buffered values; ignored by `Buffer`, `Drop` and `Latest`
    pub capacity: usize,
    pub strategy: BackpressureStrategy,
}

impl BackpressureConfig {
    pub fn new(capacity: usize, strategy: BackpressureStrategy) -> Self {
        Self { capacity, strategy }
    }

    pub fn unbounded() -> Self {
        Self::new(usize::MAX, BackpressureStrategy::Buffer)
    }
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

impl From<&RuntimeConfig> for BackpressureConfig {
    fn from(config: &RuntimeConfig) -> Self {
        Self::new(config.buffer_size, config.backpressure)
    }
}
