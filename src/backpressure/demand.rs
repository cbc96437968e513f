// Copyright (c) 2025 - Cowboy AI, Inc.
//! Demand handles.
//!
//! A [`Demand`] is the consumer's side of a backpressure-aware link: it asks
//! the [`Producer`] behind it for more values and cancels the link.

use crate::subscription::Subscription;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Something that emits when asked
pub trait Producer: Send + Sync + 'static {
    /// Allow `n` more values to be emitted
    fn request(&self, n: u64);
}

/// Consumer handle for requesting values and cancelling
#[derive(Clone)]
pub struct Demand {
    producer: Arc<dyn Producer>,
    subscription: Subscription,
}

impl Demand {
    pub fn new(producer: Arc<dyn Producer>, subscription: Subscription) -> Self {
        Self {
            producer,
            subscription,
        }
    }

    /// Ask for `n` more values
    ///
    /// `request(0)` and requests after cancellation are no-ops. Use
    /// `u64::MAX` for unbounded demand.
    pub fn request(&self, n: u64) {
        if n == 0 || self.subscription.is_disposed() {
            trace!(subscription = %self.subscription.id(), n, "request ignored");
            return;
        }
        self.producer.request(n);
    }

    /// Stop the producer and release upstream resources
    pub fn cancel(&self) {
        self.subscription.dispose();
    }

    pub fn is_cancelled(&self) -> bool {
        self.subscription.is_disposed()
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Same producer, cancelled through `subscription`
    pub(crate) fn rebind(&self, subscription: Subscription) -> Self {
        Self {
            producer: self.producer.clone(),
            subscription,
        }
    }
}

impl fmt::Debug for Demand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Demand")
            .field("subscription", &self.subscription)
            .finish()
    }
}
