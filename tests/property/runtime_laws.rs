// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for Disposal, Backpressure and Virtual Time

use cim_reactive::prelude::*;
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

proptest! {
    /// Property: nothing arrives after disposal
    ///
    /// Disposing after the k-th event means the observer sees exactly k.
    #[test]
    fn prop_no_event_after_disposal(k in 0usize..30, extra in 1usize..30) {
        let subject = Subject::publish();
        let observer = subject.as_observable().test();
        for i in 0..k {
            subject.on_next(i);
        }
        observer.dispose();
        for i in 0..extra {
            subject.on_next(k + i);
        }
        subject.on_complete();

        prop_assert_eq!(observer.value_count(), k);
        prop_assert_eq!(observer.completions(), 0);
        prop_assert!(!subject.has_observers());
    }

    /// Property: the error policy buffers at most its capacity, then fails
    ///
    /// One value is requested up front, so the first value passes straight
    /// through and the next `capacity` wait in the buffer. The overflow
    /// discards them and reaches the consumer with no further demand.
    #[test]
    fn prop_error_policy_overflow(capacity in 1usize..8, surplus in 1u64..20) {
        let total = capacity as u64 + 1 + surplus;
        let observer = TestObserver::new();
        let demand = Observable::range(1, total)
            .on_backpressure(BackpressureConfig::new(capacity, BackpressureStrategy::Error))
            .subscribe(1, observer.clone());
        observer.assert_failure(StreamError::BackpressureOverflow { capacity }, &[1]);

        demand.request(u64::MAX);
        prop_assert_eq!(observer.value_count(), 1);
        prop_assert_eq!(observer.errors().len(), 1);
    }

    /// Property: advancing virtual time runs exactly the tasks that are due
    #[test]
    fn prop_virtual_time_runs_due_tasks_once(first in 1u64..50, gap in 1u64..50) {
        let scheduler = VirtualTimeScheduler::new();
        let worker = scheduler.shared().create_worker();
        let log = Arc::new(Mutex::new(Vec::new()));
        for (name, at) in [("first", first), ("second", first + gap)] {
            let log = log.clone();
            worker.schedule(
                Box::new(move || log.lock().unwrap().push(name)),
                Duration::from_secs(at),
            );
        }

        scheduler.advance_time_by(Duration::from_secs(first));
        prop_assert_eq!(log.lock().unwrap().clone(), vec!["first"]);

        scheduler.advance_time_by(Duration::from_secs(gap - 1));
        prop_assert_eq!(log.lock().unwrap().len(), 1);

        scheduler.advance_time_by(Duration::from_secs(1 + first));
        prop_assert_eq!(log.lock().unwrap().clone(), vec!["first", "second"]);
    }
}

/// Tasks at 10s and 20s: 15s runs only the first, another 10s the second
#[test]
fn test_virtual_time_ten_and_twenty() {
    let scheduler = VirtualTimeScheduler::new();
    let worker = scheduler.shared().create_worker();
    let log = Arc::new(Mutex::new(Vec::new()));
    for at in [10u64, 20] {
        let log = log.clone();
        worker.schedule(
            Box::new(move || log.lock().unwrap().push(at)),
            Duration::from_secs(at),
        );
    }

    scheduler.advance_time_by(Duration::from_secs(15));
    assert_eq!(*log.lock().unwrap(), vec![10]);
    scheduler.advance_time_by(Duration::from_secs(10));
    assert_eq!(*log.lock().unwrap(), vec![10, 20]);
    assert_eq!(scheduler.now(), Duration::from_secs(25));
}
