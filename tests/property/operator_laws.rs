// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for Operator Laws
//!
//! Algebraic relationships between operators that must hold for every
//! input sequence, independent of its length or contents.

use cim_reactive::prelude::*;
use proptest::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// Property Test Strategies
// ============================================================================

/// Small values so arithmetic never overflows
fn values() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(-1_000i64..1_000, 0..60)
}

fn non_empty_values() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(-1_000i64..1_000, 1..60)
}

fn collect(source: Observable<i64>) -> Vec<i64> {
    let observer = source.test();
    observer.assert_complete();
    observer.values()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Property: map and filter commute when the predicates match
    ///
    /// Tripling preserves parity, so filtering even values before or after
    /// the map selects the same elements.
    #[test]
    fn prop_map_filter_commute(items in values()) {
        let filter_first = collect(
            Observable::from_iter(items.clone())
                .filter(|x| x % 2 == 0)
                .map(|x| x * 3),
        );
        let map_first = collect(
            Observable::from_iter(items)
                .map(|x| x * 3)
                .filter(|y| y % 2 == 0),
        );
        prop_assert_eq!(filter_first, map_first);
    }

    /// Property: reduce equals the last value of scan
    #[test]
    fn prop_reduce_is_last_scan(items in non_empty_values(), seed in -100i64..100) {
        let reduced = collect(Observable::from_iter(items.clone()).reduce(seed, |acc, x| acc + x));
        let scanned = collect(Observable::from_iter(items).scan(seed, |acc, x| acc + x));
        prop_assert_eq!(reduced.len(), 1);
        prop_assert_eq!(reduced.last(), scanned.last());
    }

    /// Property: buffer(n) over L values yields ceil(L / n) groups
    #[test]
    fn prop_buffer_group_count(items in values(), size in 1usize..12) {
        let observer = Observable::from_iter(items.clone()).buffer(size).test();
        let groups = observer.values();

        prop_assert_eq!(groups.len(), items.len().div_ceil(size));
        prop_assert!(groups.iter().all(|group| !group.is_empty() && group.len() <= size));
        prop_assert_eq!(groups.concat(), items);
    }

    /// Property: zip emits as many rows as its shortest source, then completes
    #[test]
    fn prop_zip_stops_at_shortest(a in 0u64..20, b in 0u64..20) {
        let observer = Observable::zip(vec![Observable::range(0, a), Observable::range(100, b)]).test();
        observer.assert_complete();
        prop_assert_eq!(observer.value_count() as u64, a.min(b));
    }

    /// Property: retry(n) on an always failing source subscribes n + 1 times
    #[test]
    fn prop_retry_attempt_count(times in 0u64..12) {
        let attempts = Arc::new(AtomicU64::new(0));
        let counter = attempts.clone();
        let observer = Observable::<i64>::defer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Observable::error(StreamError::source("always"))
        })
        .retry(times)
        .test();

        observer.assert_error(StreamError::source("always"));
        prop_assert_eq!(attempts.load(Ordering::SeqCst), times + 1);
    }

    /// Property: take(k) never emits more than k values and keeps their order
    #[test]
    fn prop_take_is_prefix(items in values(), count in 0u64..80) {
        let taken = collect(Observable::from_iter(items.clone()).take(count));
        let expected: Vec<i64> = items.into_iter().take(count as usize).collect();
        prop_assert_eq!(taken, expected);
    }
}
