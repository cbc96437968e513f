// Copyright (c) 2025 - Cowboy AI, Inc.
//! Runtime configuration

use crate::backpressure::BackpressureStrategy;
use crate::errors::{StreamError, StreamResult};
use serde::{Deserialize, Serialize};

/// Default capacity of bounded backpressure buffers
pub const DEFAULT_BUFFER_SIZE: usize = 128;

/// Default number of items `observe_on` requests ahead of its consumer
pub const DEFAULT_PREFETCH: usize = 16;

/// Default thread name prefix for dedicated lanes
pub const DEFAULT_LANE_PREFIX: &str = "cim-rx-lane";

/// Configuration shared by schedulers and backpressure controllers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Capacity of bounded overflow buffers
    pub buffer_size: usize,
    /// Items requested ahead across an `observe_on` boundary
    pub prefetch: usize,
    /// Overflow policy applied when none is given explicitly
    pub backpressure: BackpressureStrategy,
    /// Thread name prefix for [`crate::scheduler::LaneScheduler`]
    pub lane_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            prefetch: DEFAULT_PREFETCH,
            backpressure: BackpressureStrategy::default(),
            lane_prefix: DEFAULT_LANE_PREFIX.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from `CIM_RX_*` environment variables
    ///
    /// Unset variables fall back to defaults; malformed ones are errors.
    pub fn from_env() -> StreamResult<Self> {
        let defaults = Self::default();
        let buffer_size = match std::env::var("CIM_RX_BUFFER_SIZE") {
            Ok(raw) => raw.trim().parse()?,
            Err(_) => defaults.buffer_size,
        };
        let prefetch = match std::env::var("CIM_RX_PREFETCH") {
            Ok(raw) => raw.trim().parse()?,
            Err(_) => defaults.prefetch,
        };
        let backpressure = match std::env::var("CIM_RX_BACKPRESSURE") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.backpressure,
        };
        let lane_prefix =
            std::env::var("CIM_RX_LANE_PREFIX").unwrap_or_else(|_| defaults.lane_prefix.clone());

        let config = Self {
            buffer_size,
            prefetch,
            backpressure,
            lane_prefix,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from JSON, filling missing fields with defaults
    pub fn from_json(json: &str) -> StreamResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject sizes that would stall every pipeline
    pub fn validate(&self) -> StreamResult<()> {
        if self.buffer_size == 0 {
            return Err(StreamError::Configuration(
                "buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.prefetch == 0 {
            return Err(StreamError::Configuration(
                "prefetch must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    #[must_use]
    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    #[must_use]
    pub fn with_backpressure(mut self, strategy: BackpressureStrategy) -> Self {
        self.backpressure = strategy;
        self
    }

    #[must_use]
    pub fn with_lane_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.lane_prefix = prefix.into();
        self
    }
}
