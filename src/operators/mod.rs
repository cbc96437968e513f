// Copyright (c) 2025 - Cowboy AI, Inc.
//! Operators
//!
//! Every operator is a method on [`Observable`](crate::Observable) that
//! consumes `self` and returns a new cold observable. Nothing runs until the
//! result is subscribed, and each subscription gets private operator state.
//!
//! ## Operator Families
//!
//! - [`stage`]: the [`Stage`] abstraction plus the synchronous stages
//! - [`transform`]: map, filter, scan, reduce, buffer, take, skip, side effects
//! - [`window`]: count and time windows
//! - [`flatten`]: flat_map, concat_map, switch_map, merge
//! - [`combine`]: zip, combine_latest, concat, start_with, amb
//! - [`error`]: retry, retry_when, error recovery
//! - [`time`]: debounce, throttle, sample, timeout, delay, timestamps
//! - [`schedule`]: subscribe_on, observe_on
//!
//! ## Termination
//!
//! Operators forward the first terminal event and nothing after it. An
//! error terminates the whole chain unless an [`error`] operator handles it.

pub mod combine;
pub mod error;
pub mod flatten;
pub mod schedule;
pub mod stage;
pub mod time;
pub mod transform;
pub mod window;

pub use stage::{FnStage, Stage};
