// Copyright (c) 2025 - Cowboy AI, Inc.
//! Integration tests for schedulers
//!
//! These tests verify where and when pipeline work runs:
//! 1. Virtual time drives timed operators deterministically
//! 2. subscribe_on and observe_on move work onto named lanes
//! 3. The pool scheduler runs timed sources on the tokio runtime
//! 4. A panic on a worker fails only the stream it was emitting for

use cim_reactive::prelude::*;
use cim_reactive::scheduler::schedule_periodic;
use pretty_assertions::assert_eq;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

fn thread_name() -> String {
    thread::current().name().unwrap_or("unnamed").to_string()
}

/// Test: Recorded event times follow the virtual clock
#[test]
fn test_recorded_times_follow_virtual_clock() {
    let scheduler = VirtualTimeScheduler::new();
    let observer = TestObserver::with_clock(scheduler.shared());
    Observable::interval(Duration::from_secs(2), scheduler.shared())
        .take(3)
        .subscribe(observer.clone());

    scheduler.advance_time_by(Duration::from_secs(10));

    let times: Vec<Duration> = observer.recorded().iter().map(|(at, _)| *at).collect();
    assert_eq!(
        times,
        vec![
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(6),
            Duration::from_secs(6),
        ]
    );
    observer.assert_values(&[0, 1, 2]).assert_complete();
}

/// Test: A delayed value loses the race against a shorter timeout
#[test]
fn test_timeout_beats_slow_delay() {
    let scheduler = VirtualTimeScheduler::new();
    let observer = Observable::just("late")
        .delay(Duration::from_secs(3), scheduler.shared())
        .timeout(Duration::from_secs(2), scheduler.shared())
        .test();

    scheduler.advance_time_by(Duration::from_secs(2));
    observer.assert_error(StreamError::Timeout(Duration::from_secs(2)));

    // the delayed value was cancelled along with its upstream
    scheduler.advance_time_by(Duration::from_secs(5));
    observer.assert_value_count(0);
    assert_eq!(observer.errors().len(), 1);
}

/// Test: Work hops from an io lane to a ui lane
#[test]
fn test_subscribe_on_and_observe_on_lanes() {
    let observer = Observable::create(|subscriber: Subscriber<String>| {
        subscriber.next(thread_name());
        subscriber.complete();
    })
    .subscribe_on(Arc::new(LaneScheduler::new("io")))
    .observe_on(Arc::new(LaneScheduler::new("ui")))
    .map(|produced_on| format!("{produced_on} -> {}", thread_name()))
    .test();

    assert!(observer.await_terminal(Duration::from_secs(5)));
    observer
        .assert_values(&["io-0 -> ui-0".to_string()])
        .assert_complete();
}

/// Test: The current-thread scheduler finishes before subscribe returns
#[test]
fn test_current_thread_runs_inline() {
    let caller = thread::current().id();
    let observer = Observable::range(0, 10_000)
        .subscribe_on(current_thread())
        .filter(move |_| thread::current().id() == caller)
        .count()
        .test();

    observer.assert_values(&[10_000]).assert_complete();
}

/// Test: A periodic task on a real lane stops once its handle is disposed
#[test]
fn test_periodic_task_on_lane() {
    let lane = LaneScheduler::new("ticker");
    let worker = lane.create_worker();
    let (tx, rx) = mpsc::channel();
    let mut tick = 0u32;
    let handle = schedule_periodic(
        &worker,
        Duration::ZERO,
        Duration::from_millis(5),
        move || {
            tick += 1;
            let _ = tx.send(tick);
        },
    );

    let first_three: Vec<u32> = (0..3)
        .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
        .collect();
    assert_eq!(first_three, vec![1, 2, 3]);

    handle.dispose();
    worker.dispose();
    while rx.recv_timeout(Duration::from_millis(50)).is_ok() {}
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
}

/// Test: A panicking observer on a lane fails its stream and stops the ticks
#[test]
fn test_panicking_observer_on_lane_fails_stream() {
    let lane = Arc::new(LaneScheduler::new("faulty"));
    let observer = Observable::interval(Duration::from_millis(5), lane)
        .map(|tick| if tick == 2 { panic!("tick two") } else { tick })
        .test();

    assert!(observer.await_terminal(Duration::from_secs(5)));
    thread::sleep(Duration::from_millis(30));
    observer.assert_failure(StreamError::TaskFailed("tick two".into()), &[0, 1]);
    assert_eq!(observer.errors().len(), 1);
}

/// Test: Interval on the tokio-backed pool scheduler
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pool_interval_under_tokio() {
    let scheduler = pool().unwrap();
    let observer = Observable::interval(Duration::from_millis(5), scheduler)
        .take(4)
        .test();

    tokio::time::timeout(Duration::from_secs(5), async {
        while !observer.is_terminated() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    observer.assert_values(&[0, 1, 2, 3]).assert_complete();
}
