// Copyright (c) 2025 - Cowboy AI, Inc.
//! Small synchronization helpers shared by operators, producers and lanes.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
///
/// Lane tasks are run under `catch_unwind`, so a poisoned lock only means a
/// user callback panicked; the protected state is still structurally valid.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Work-in-progress counter for queue-drain loops.
///
/// The caller that moves the counter from zero owns the drain loop; every
/// other caller just records that more work is pending and returns.
#[derive(Debug, Default)]
pub(crate) struct WorkInProgress(AtomicUsize);

impl WorkInProgress {
    pub(crate) fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    /// Returns true when the caller now owns the drain loop.
    pub(crate) fn enter(&self) -> bool {
        self.0.fetch_add(1, Ordering::AcqRel) == 0
    }

    /// Returns true when more work arrived and the owner must loop again.
    pub(crate) fn leave(&self) -> bool {
        self.0.fetch_sub(1, Ordering::AcqRel) != 1
    }
}

/// Outstanding demand counter.
///
/// Saturates at `u64::MAX`, which is treated as unbounded and never
/// decremented. Never goes below zero.
#[derive(Debug, Default)]
pub(crate) struct Requested(AtomicU64);

impl Requested {
    pub(crate) fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub(crate) fn add(&self, n: u64) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current == u64::MAX {
                    None
                } else {
                    Some(current.saturating_add(n))
                }
            });
    }

    pub(crate) fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn produced(&self, n: u64) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current == u64::MAX {
                    None
                } else {
                    Some(current.saturating_sub(n))
                }
            });
    }
}
