// Copyright (c) 2025 - Cowboy AI, Inc.
//! Overflow buffers between push sources and demand-driven consumers.
//!
//! [`Observable::on_backpressure`] turns a source that cannot be slowed down
//! into a [`Flowable`]. Values arriving while the consumer has no outstanding
//! demand are held in a buffer governed by a [`BackpressureStrategy`]:
//!
//! | Strategy | Buffer full / no demand |
//! |----------|-------------------------|
//! | `Buffer` | keeps growing |
//! | `Error` | discards the buffer and terminates with `BackpressureOverflow` |
//! | `DropOldest` | evicts the head |
//! | `DropLatest` | evicts the tail |
//! | `Drop` | discards the arriving value |
//! | `Latest` | overwrites the single pending value |
//!
//! An overflow under `Error` is delivered at once, whatever the consumer's
//! outstanding demand: a terminal never waits for a request.
//!
//! The upstream source is subscribed lazily on the first request, so a
//! synchronous source paced by a consumer that requests as it goes loses
//! nothing.

use super::{BackpressureConfig, BackpressureStrategy, Demand, Flowable, Producer};
use crate::errors::StreamError;
use crate::event::Terminal;
use crate::observable::Observable;
use crate::observer::Observer;
use crate::subscription::{Subscriber, Subscription};
use crate::sync::{lock, Requested, WorkInProgress};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{trace, warn};

/// Demand-bounded queue drained by at most one caller at a time
pub(crate) struct DeliveryQueue<T> {
    state: Mutex<QueueState<T>>,
    requested: Requested,
    wip: WorkInProgress,
}

pub(crate) struct QueueState<T> {
    pub(crate) items: VecDeque<T>,
    pub(crate) terminal: Option<Terminal>,
}

enum Step<T> {
    Item(T),
    Terminal(Terminal),
    Idle,
}

impl<T: Send + 'static> DeliveryQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                terminal: None,
            }),
            requested: Requested::new(),
            wip: WorkInProgress::new(),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, QueueState<T>> {
        lock(&self.state)
    }

    pub(crate) fn add_demand(&self, n: u64) {
        self.requested.add(n);
    }

    pub(crate) fn outstanding(&self) -> u64 {
        self.requested.get()
    }

    /// Claim the drain loop; a `true` result must be followed by `drain_owned`
    pub(crate) fn enter(&self) -> bool {
        self.wip.enter()
    }

    pub(crate) fn drain<F>(&self, downstream: &Subscriber<T>, on_emit: F)
    where
        F: FnMut(),
    {
        if self.enter() {
            self.drain_owned(downstream, on_emit);
        }
    }

    /// Emit while demand lasts, then the terminal once the queue is empty
    pub(crate) fn drain_owned<F>(&self, downstream: &Subscriber<T>, mut on_emit: F)
    where
        F: FnMut(),
    {
        loop {
            loop {
                if downstream.is_closed() {
                    return;
                }
                let step = {
                    let mut state = lock(&self.state);
                    if self.requested.get() > 0 {
                        match state.items.pop_front() {
                            Some(item) => Step::Item(item),
                            None => state.terminal.take().map_or(Step::Idle, Step::Terminal),
                        }
                    } else if state.items.is_empty() {
                        state.terminal.take().map_or(Step::Idle, Step::Terminal)
                    } else {
                        Step::Idle
                    }
                };
                match step {
                    Step::Item(item) => {
                        self.requested.produced(1);
                        downstream.next(item);
                        on_emit();
                    }
                    Step::Terminal(terminal) => {
                        downstream.emit(terminal.into_event());
                        return;
                    }
                    Step::Idle => break,
                }
            }
            if !self.wip.leave() {
                return;
            }
        }
    }
}

struct OverflowBuffer<T> {
    source: Observable<T>,
    config: BackpressureConfig,
    queue: DeliveryQueue<T>,
    connected: AtomicBool,
    downstream: Subscriber<T>,
    upstream: Subscription,
}

struct OverflowDemand<T> {
    state: Arc<OverflowBuffer<T>>,
}

impl<T: Send + 'static> Producer for OverflowDemand<T> {
    fn request(&self, n: u64) {
        let state = &self.state;
        state.queue.add_demand(n);
        if !state.connected.swap(true, Ordering::AcqRel) {
            state.source.subscribe_with(Subscriber::with_subscription(
                OverflowInput {
                    state: state.clone(),
                },
                state.upstream.clone(),
            ));
        }
        state.queue.drain(&state.downstream, || {});
    }
}

struct OverflowInput<T> {
    state: Arc<OverflowBuffer<T>>,
}

impl<T: Send + 'static> OverflowInput<T> {
    fn finish(&self, terminal: Terminal) {
        self.state.queue.state().terminal.get_or_insert(terminal);
        self.state.queue.drain(&self.state.downstream, || {});
    }
}

impl<T: Send + 'static> Observer<T> for OverflowInput<T> {
    fn on_next(&mut self, value: T) {
        let capacity = self.state.config.capacity;
        let mut overflowed = false;
        {
            let mut queue = self.state.queue.state();
            if queue.terminal.is_some() {
                return;
            }
            match self.state.config.strategy {
                BackpressureStrategy::Buffer => queue.items.push_back(value),
                BackpressureStrategy::Error => {
                    if queue.items.len() >= capacity {
                        queue.items.clear();
                        queue.terminal = Some(Terminal::Error(StreamError::BackpressureOverflow {
                            capacity,
                        }));
                        overflowed = true;
                    } else {
                        queue.items.push_back(value);
                    }
                }
                BackpressureStrategy::DropOldest => {
                    if queue.items.len() >= capacity && queue.items.pop_front().is_some() {
                        trace!(capacity, "dropped oldest buffered value");
                    }
                    queue.items.push_back(value);
                }
                BackpressureStrategy::DropLatest => {
                    if queue.items.len() >= capacity && queue.items.pop_back().is_some() {
                        trace!(capacity, "dropped latest buffered value");
                    }
                    queue.items.push_back(value);
                }
                BackpressureStrategy::Drop => {
                    let pending = u64::try_from(queue.items.len()).unwrap_or(u64::MAX);
                    if pending < self.state.queue.outstanding() {
                        queue.items.push_back(value);
                    } else {
                        trace!("dropped value without demand");
                    }
                }
                BackpressureStrategy::Latest => {
                    queue.items.clear();
                    queue.items.push_back(value);
                }
            }
        }
        if overflowed {
            warn!(capacity, "backpressure overflow; cancelling upstream");
            self.state.upstream.dispose();
        }
        self.state.queue.drain(&self.state.downstream, || {});
    }

    fn on_error(&mut self, error: StreamError) {
        self.finish(Terminal::Error(error));
    }

    fn on_complete(&mut self) {
        self.finish(Terminal::Complete);
    }
}

impl<T: Send + 'static> Observable<T> {
    /// Adapt this push source to a demand-driven [`Flowable`]
    ///
    /// # Arguments
    ///
    /// * `config` - Buffer capacity and the policy applied when it is full
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let flow = Observable::interval(Duration::from_millis(1), lane)
    ///     .on_backpressure(BackpressureConfig::new(16, BackpressureStrategy::DropOldest))
    ///     .observe_on(other_lane, 4);
    /// ```
    pub fn on_backpressure(self, config: BackpressureConfig) -> Flowable<T> {
        Flowable::create(move |downstream: Subscriber<T>| {
            let parent = downstream.subscription().clone();
            let upstream = Subscription::new();
            parent.add(upstream.clone());
            let state = Arc::new(OverflowBuffer {
                source: self.clone(),
                config,
                queue: DeliveryQueue::new(),
                connected: AtomicBool::new(false),
                downstream,
                upstream,
            });
            Demand::new(Arc::new(OverflowDemand { state }), parent)
        })
    }

    /// Buffer without bound until the consumer catches up
    pub fn on_backpressure_buffer(self) -> Flowable<T> {
        self.on_backpressure(BackpressureConfig::unbounded())
    }

    /// Discard values that arrive without outstanding demand
    pub fn on_backpressure_drop(self) -> Flowable<T> {
        self.on_backpressure(BackpressureConfig::new(0, BackpressureStrategy::Drop))
    }

    /// Keep only the most recent value the consumer has not taken yet
    pub fn on_backpressure_latest(self) -> Flowable<T> {
        self.on_backpressure(BackpressureConfig::new(1, BackpressureStrategy::Latest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestObserver;
    use test_case::test_case;

    fn fast_five(strategy: BackpressureStrategy) -> (TestObserver<i64>, Demand) {
        let observer = TestObserver::new();
        let demand = Observable::range(1, 5)
            .on_backpressure(BackpressureConfig::new(2, strategy))
            .subscribe(1, observer.clone());
        (observer, demand)
    }

    #[test]
    fn test_error_policy_fails_without_demand() {
        let (observer, demand) = fast_five(BackpressureStrategy::Error);
        observer.assert_failure(StreamError::BackpressureOverflow { capacity: 2 }, &[1]);

        // the discarded buffer stays discarded
        demand.request(10);
        observer.assert_failure(StreamError::BackpressureOverflow { capacity: 2 }, &[1]);
    }

    #[test]
    fn test_error_policy_within_capacity_completes() {
        let observer = TestObserver::new();
        let demand = Observable::range(1, 3)
            .on_backpressure(BackpressureConfig::new(2, BackpressureStrategy::Error))
            .subscribe(1, observer.clone());
        observer.assert_values(&[1]).assert_not_complete();

        demand.request(2);
        observer.assert_values(&[1, 2, 3]).assert_complete();
    }

    #[test_case(BackpressureStrategy::DropOldest, &[1, 4, 5] ; "drop oldest keeps newest")]
    #[test_case(BackpressureStrategy::DropLatest, &[1, 2, 5] ; "drop latest evicts tail")]
    #[test_case(BackpressureStrategy::Buffer, &[1, 2, 3, 4, 5] ; "unbounded keeps all")]
    #[test_case(BackpressureStrategy::Latest, &[1, 5] ; "latest keeps last")]
    #[test_case(BackpressureStrategy::Drop, &[1] ; "drop discards without demand")]
    fn test_policies_with_slow_consumer(strategy: BackpressureStrategy, expected: &[i64]) {
        let (observer, demand) = fast_five(strategy);
        demand.request(10);
        observer.assert_values(expected).assert_complete();
    }

    #[test]
    fn test_paced_consumer_loses_nothing_with_drop() {
        let observer = TestObserver::with_auto_request(1);
        Observable::range(1, 5)
            .on_backpressure_drop()
            .subscribe(1, observer.clone());
        observer.assert_values(&[1, 2, 3, 4, 5]).assert_complete();
    }

    #[test]
    fn test_cancel_disposes_upstream() {
        let observer = TestObserver::new();
        let source = crate::hot::Subject::publish();
        let demand = source
            .as_observable()
            .on_backpressure_buffer()
            .subscribe(1, observer.clone());

        source.on_next(1);
        demand.cancel();
        source.on_next(2);

        observer.assert_values(&[1]);
        assert!(!source.has_observers());
    }
}
