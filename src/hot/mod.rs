// Copyright (c) 2025 - Cowboy AI, Inc.
//! Hot Sources
//!
//! Cold observables run their recipe once per subscriber. The types here
//! share one upstream lifecycle between many subscribers instead:
//!
//! - [`Subject`]: push events in by hand and multicast them
//! - [`ConnectableObservable`]: multicast a cold source once connected,
//!   with `ref_count`, `auto_connect`, `share` and `cache` on top
//!
//! A hot source runs upstream side effects once per event no matter how many
//! subscribers are attached, and buffers nothing unless it replays.

pub mod connectable;
pub mod subject;

pub use connectable::ConnectableObservable;
pub use subject::Subject;
