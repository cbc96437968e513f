// Copyright (c) 2025 - Cowboy AI, Inc.
//! Test Harness
//!
//! [`TestObserver`] records every event it receives together with the time
//! it arrived, read from an optional scheduler clock. Combined with
//! [`crate::scheduler::VirtualTimeScheduler`] this gives deterministic
//! assertions over timed pipelines without real delays:
//!
//! ```rust,ignore
//! let scheduler = VirtualTimeScheduler::new();
//! let observer = TestObserver::with_clock(scheduler.shared());
//! Observable::interval(Duration::from_secs(1), scheduler.shared())
//!     .take(3)
//!     .subscribe(observer.clone());
//!
//! scheduler.advance_time_by(Duration::from_secs(3));
//! observer.assert_values(&[0, 1, 2]).assert_complete();
//! assert_eq!(observer.recorded()[0].0, Duration::from_secs(1));
//! ```
//!
//! The same observer doubles as a [`FlowObserver`], optionally re-requesting
//! a fixed amount of demand after each value.

use crate::backpressure::{Demand, FlowObserver};
use crate::errors::StreamError;
use crate::event::{Event, Occurrence};
use crate::observer::Observer;
use crate::scheduler::SchedulerRef;
use crate::subscription::Subscription;
use crate::sync::lock;
use std::fmt::Debug;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Recording observer with assertion helpers
pub struct TestObserver<T> {
    state: Arc<TestState<T>>,
}

struct TestState<T> {
    recorded: Mutex<Vec<Occurrence<T>>>,
    changed: Condvar,
    clock: Option<SchedulerRef>,
    subscription: Mutex<Option<Subscription>>,
    demand: Mutex<Option<Demand>>,
    auto_request: u64,
}

impl<T> Clone for TestObserver<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Default for TestObserver<T> {
    fn default() -> Self {
        Self::build(None, 0)
    }
}

impl<T> TestObserver<T> {
    fn build(clock: Option<SchedulerRef>, auto_request: u64) -> Self {
        Self {
            state: Arc::new(TestState {
                recorded: Mutex::new(Vec::new()),
                changed: Condvar::new(),
                clock,
                subscription: Mutex::new(None),
                demand: Mutex::new(None),
                auto_request,
            }),
        }
    }

    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp recorded events with `clock`'s time
    pub fn with_clock(clock: SchedulerRef) -> Self {
        Self::build(Some(clock), 0)
    }

    /// As a flow observer, request `n` more after every value
    pub fn with_auto_request(n: u64) -> Self {
        Self::build(None, n)
    }

    pub(crate) fn attach(&self, subscription: Subscription) {
        *lock(&self.state.subscription) = Some(subscription);
    }

    pub(crate) fn attach_demand(&self, demand: Demand) {
        *lock(&self.state.demand) = Some(demand);
    }

    fn record(&self, event: Event<T>) {
        let at = self
            .state
            .clock
            .as_ref()
            .map_or(Duration::ZERO, |clock| clock.now());
        lock(&self.state.recorded).push((at, event));
        self.state.changed.notify_all();
    }

    /// Dispose the attached subscription, if any
    pub fn dispose(&self) {
        if let Some(subscription) = lock(&self.state.subscription).as_ref() {
            subscription.dispose();
        }
        if let Some(demand) = lock(&self.state.demand).as_ref() {
            demand.cancel();
        }
    }

    /// Request `n` more values through the attached demand handle
    pub fn request(&self, n: u64) {
        let demand = lock(&self.state.demand).clone();
        if let Some(demand) = demand {
            demand.request(n);
        }
    }

    pub fn value_count(&self) -> usize {
        lock(&self.state.recorded)
            .iter()
            .filter(|(_, event)| event.is_next())
            .count()
    }

    pub fn errors(&self) -> Vec<StreamError> {
        lock(&self.state.recorded)
            .iter()
            .filter_map(|(_, event)| match event {
                Event::Error(error) => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> usize {
        lock(&self.state.recorded)
            .iter()
            .filter(|(_, event)| matches!(event, Event::Complete))
            .count()
    }

    pub fn is_terminated(&self) -> bool {
        lock(&self.state.recorded)
            .iter()
            .any(|(_, event)| event.is_terminal())
    }

    /// Block until a terminal event arrives or `timeout` passes
    pub fn await_terminal(&self, timeout: Duration) -> bool {
        self.await_until(timeout, |recorded| {
            recorded.iter().any(|(_, event)| event.is_terminal())
        })
    }

    /// Block until at least `count` values arrived or `timeout` passes
    pub fn await_count(&self, count: usize, timeout: Duration) -> bool {
        self.await_until(timeout, |recorded| {
            recorded.iter().filter(|(_, event)| event.is_next()).count() >= count
        })
    }

    fn await_until<P>(&self, timeout: Duration, done: P) -> bool
    where
        P: Fn(&[Occurrence<T>]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut recorded = lock(&self.state.recorded);
        loop {
            if done(&recorded) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            recorded = self
                .state
                .changed
                .wait_timeout(recorded, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    pub fn assert_value_count(&self, expected: usize) -> &Self {
        let actual = self.value_count();
        assert_eq!(actual, expected, "value count mismatch");
        self
    }

    /// Exactly one completion and no error
    pub fn assert_complete(&self) -> &Self {
        assert_eq!(self.completions(), 1, "expected exactly one completion");
        assert!(self.errors().is_empty(), "completed stream also errored");
        self
    }

    pub fn assert_not_complete(&self) -> &Self {
        assert_eq!(self.completions(), 0, "stream completed unexpectedly");
        self
    }

    pub fn assert_no_errors(&self) -> &Self {
        let errors = self.errors();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        self
    }

    /// Exactly one error, equal to `expected`
    pub fn assert_error(&self, expected: StreamError) -> &Self {
        assert_eq!(self.errors(), vec![expected], "error mismatch");
        assert_eq!(self.completions(), 0, "errored stream also completed");
        self
    }

    pub fn assert_terminated(&self) -> &Self {
        assert!(self.is_terminated(), "stream has not terminated");
        self
    }

    /// Whether the observer is still subscribed
    pub fn is_disposed(&self) -> bool {
        lock(&self.state.subscription)
            .as_ref()
            .map_or(false, Subscription::is_disposed)
    }
}

impl<T: Clone> TestObserver<T> {
    pub fn values(&self) -> Vec<T> {
        lock(&self.state.recorded)
            .iter()
            .filter_map(|(_, event)| event.as_next().cloned())
            .collect()
    }

    pub fn events(&self) -> Vec<Event<T>> {
        lock(&self.state.recorded)
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Every event with the clock time it arrived at
    pub fn recorded(&self) -> Vec<Occurrence<T>> {
        lock(&self.state.recorded).clone()
    }
}

impl<T: Clone + PartialEq + Debug> TestObserver<T> {
    pub fn assert_values(&self, expected: &[T]) -> &Self {
        assert_eq!(self.values(), expected.to_vec(), "values mismatch");
        self
    }

    /// Values `expected`, followed by exactly the error `error`
    pub fn assert_failure(&self, error: StreamError, expected: &[T]) -> &Self {
        self.assert_values(expected);
        self.assert_error(error)
    }
}

impl<T: Send + 'static> Observer<T> for TestObserver<T> {
    fn on_next(&mut self, value: T) {
        self.record(Event::Next(value));
    }

    fn on_error(&mut self, error: StreamError) {
        self.record(Event::Error(error));
    }

    fn on_complete(&mut self) {
        self.record(Event::Complete);
    }
}

impl<T: Send + 'static> FlowObserver<T> for TestObserver<T> {
    fn on_next(&mut self, value: T, demand: &Demand) {
        self.record(Event::Next(value));
        if self.state.auto_request > 0 {
            demand.request(self.state.auto_request);
        }
    }

    fn on_error(&mut self, error: StreamError) {
        self.record(Event::Error(error));
    }

    fn on_complete(&mut self) {
        self.record(Event::Complete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::VirtualTimeScheduler;
    use std::thread;

    #[test]
    fn test_records_with_clock() {
        let scheduler = VirtualTimeScheduler::new();
        let mut observer = TestObserver::with_clock(scheduler.shared());

        Observer::on_next(&mut observer, 1);
        scheduler.advance_time_by(Duration::from_secs(2));
        Observer::on_next(&mut observer, 2);
        Observer::<i32>::on_complete(&mut observer);

        assert_eq!(
            observer.recorded(),
            vec![
                (Duration::ZERO, Event::Next(1)),
                (Duration::from_secs(2), Event::Next(2)),
                (Duration::from_secs(2), Event::Complete),
            ]
        );
    }

    #[test]
    fn test_await_terminal_across_threads() {
        let observer = TestObserver::<i32>::new();
        let mut remote = observer.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            Observer::on_complete(&mut remote);
        });
        assert!(observer.await_terminal(Duration::from_secs(2)));
        handle.join().unwrap();
    }

    #[test]
    fn test_await_times_out() {
        let observer = TestObserver::<i32>::new();
        assert!(!observer.await_count(1, Duration::from_millis(10)));
    }

    #[test]
    #[should_panic(expected = "values mismatch")]
    fn test_assert_values_reports_mismatch() {
        let mut observer = TestObserver::new();
        Observer::on_next(&mut observer, 1);
        observer.assert_values(&[2]);
    }
}
