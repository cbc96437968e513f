// Copyright (c) 2025 - Cowboy AI, Inc.
//! Demand-driven sources.
//!
//! A [`Flowable<T>`] emits only what its consumer asked for. Subscribing
//! returns a [`Demand`]; every `Next` spends one unit of it and the consumer
//! replenishes it from inside [`FlowObserver::on_next`]:
//!
//! ```rust,ignore
//! struct OneAtATime;
//!
//! impl FlowObserver<i64> for OneAtATime {
//!     fn on_next(&mut self, value: i64, demand: &Demand) {
//!         process(value);
//!         demand.request(1);
//!     }
//!     fn on_error(&mut self, error: StreamError) { eprintln!("{error}") }
//!     fn on_complete(&mut self) {}
//! }
//!
//! Flowable::range(1, 1_000).subscribe(1, OneAtATime);
//! ```

use super::buffer::DeliveryQueue;
use super::{Demand, Producer};
use crate::errors::StreamError;
use crate::event::Terminal;
use crate::observable::Observable;
use crate::observer::Observer;
use crate::operators::stage::{FilterStage, MapStage, Stage};
use crate::scheduler::{guarded, worker_for, SchedulerRef, WorkerRef};
use crate::subscription::Subscriber;
use crate::sync::{lock, Requested, WorkInProgress};
use crate::testing::TestObserver;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tracing::warn;

/// Consumer of a demand-driven stream
pub trait FlowObserver<T>: Send {
    /// A value arrived; `demand` requests more
    fn on_next(&mut self, value: T, demand: &Demand);

    fn on_error(&mut self, error: StreamError);

    fn on_complete(&mut self);
}

type OnFlowSubscribe<T> = Arc<dyn Fn(Subscriber<T>) -> Demand + Send + Sync>;

/// A cold source that respects consumer demand
pub struct Flowable<T> {
    on_subscribe: OnFlowSubscribe<T>,
}

impl<T> Clone for Flowable<T> {
    fn clone(&self) -> Self {
        Self {
            on_subscribe: self.on_subscribe.clone(),
        }
    }
}

struct FlowAdapter<O> {
    observer: O,
    demand: Arc<OnceLock<Demand>>,
}

impl<T, O> Observer<T> for FlowAdapter<O>
where
    T: Send + 'static,
    O: FlowObserver<T>,
{
    fn on_next(&mut self, value: T) {
        if let Some(demand) = self.demand.get() {
            self.observer.on_next(value, demand);
        }
    }

    fn on_error(&mut self, error: StreamError) {
        self.observer.on_error(error);
    }

    fn on_complete(&mut self) {
        self.observer.on_complete();
    }
}

struct IterProducer<I: Iterator> {
    items: Mutex<I>,
    requested: Requested,
    wip: WorkInProgress,
    subscriber: Subscriber<I::Item>,
}

impl<I> Producer for IterProducer<I>
where
    I: Iterator + Send + 'static,
    I::Item: Send + 'static,
{
    fn request(&self, n: u64) {
        self.requested.add(n);
        if !self.wip.enter() {
            return;
        }
        loop {
            while self.requested.get() > 0 {
                if self.subscriber.is_closed() {
                    return;
                }
                let next = lock(&self.items).next();
                match next {
                    Some(item) => {
                        self.requested.produced(1);
                        self.subscriber.next(item);
                    }
                    None => {
                        self.subscriber.complete();
                        return;
                    }
                }
            }
            if !self.wip.leave() {
                return;
            }
        }
    }
}

/// Producer for sources that terminate without emitting
struct Inert;

impl Producer for Inert {
    fn request(&self, _n: u64) {}
}

impl<T: Send + 'static> Flowable<T> {
    /// Create a flowable from a subscribe function
    ///
    /// The function receives the downstream [`Subscriber`] and must return a
    /// [`Demand`] whose subscription is that subscriber's subscription. It
    /// must not emit `Next` before demand arrives through that handle.
    pub fn create<F>(on_subscribe: F) -> Self
    where
        F: Fn(Subscriber<T>) -> Demand + Send + Sync + 'static,
    {
        Self {
            on_subscribe: Arc::new(on_subscribe),
        }
    }

    /// Emit the items of `items` as demand allows, then complete
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Self::create(move |subscriber| {
            let subscription = subscriber.subscription().clone();
            let producer = IterProducer {
                items: Mutex::new(items.clone().into_iter()),
                requested: Requested::new(),
                wip: WorkInProgress::new(),
                subscriber,
            };
            Demand::new(Arc::new(producer), subscription)
        })
    }

    pub fn just(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_iter(std::iter::once(value))
    }

    pub fn empty() -> Self {
        Self::create(|subscriber| {
            subscriber.complete();
            Demand::new(Arc::new(Inert), subscriber.subscription().clone())
        })
    }

    pub fn error(error: StreamError) -> Self {
        Self::create(move |subscriber| {
            subscriber.error(error.clone());
            Demand::new(Arc::new(Inert), subscriber.subscription().clone())
        })
    }

    /// Hand an already wrapped subscriber to this flowable
    pub fn subscribe_with(&self, subscriber: Subscriber<T>) -> Demand {
        (self.on_subscribe)(subscriber)
    }

    /// Subscribe `observer` and request `initial_request` values
    ///
    /// # Returns
    ///
    /// The demand handle; request more through it or cancel.
    pub fn subscribe<O>(&self, initial_request: u64, observer: O) -> Demand
    where
        O: FlowObserver<T> + 'static,
    {
        let slot = Arc::new(OnceLock::new());
        let subscriber = Subscriber::new(FlowAdapter {
            observer,
            demand: slot.clone(),
        });
        let demand = self.subscribe_with(subscriber);
        let _ = slot.set(demand.clone());
        demand.request(initial_request);
        demand
    }

    /// Subscribe a fresh [`TestObserver`] requesting `initial_request`
    pub fn test(&self, initial_request: u64) -> TestObserver<T> {
        self.test_with(TestObserver::new(), initial_request)
    }

    /// Subscribe `observer` and attach the demand handle to it
    pub fn test_with(&self, observer: TestObserver<T>, initial_request: u64) -> TestObserver<T> {
        let demand = self.subscribe(initial_request, observer.clone());
        observer.attach(demand.subscription().clone());
        observer.attach_demand(demand);
        observer
    }

    /// Apply a stage that emits at most one value per input
    ///
    /// Inputs the stage swallows are replaced by requesting one more
    /// upstream, so downstream demand is honoured exactly.
    pub fn lift<U, S, F>(self, factory: F) -> Flowable<U>
    where
        U: Send + 'static,
        S: Stage<T, U>,
        F: Fn() -> S + Send + Sync + 'static,
    {
        Flowable::create(move |downstream: Subscriber<U>| {
            let parent = downstream.subscription().clone();
            let upstream_demand = Arc::new(OnceLock::new());
            let upstream = Subscriber::linked(
                &parent,
                FlowStage {
                    stage: factory(),
                    downstream,
                    upstream: upstream_demand.clone(),
                    _input: PhantomData,
                },
            );
            let demand = self.subscribe_with(upstream);
            let _ = upstream_demand.set(demand.clone());
            demand.rebind(parent)
        })
    }

    pub fn map<U, F>(self, f: F) -> Flowable<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move || MapStage::new(f.clone()))
    }

    pub fn filter<P>(self, predicate: P) -> Flowable<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.lift(move || FilterStage::new(predicate.clone()))
    }

    /// Deliver on a worker of `scheduler`, prefetching at most `prefetch`
    /// values ahead of the consumer
    ///
    /// Upstream is replenished in batches of three quarters of `prefetch`.
    /// An upstream that ignores demand and overfills the prefetch buffer
    /// fails the stream with `BackpressureOverflow` at once, discarding the
    /// prefetched values.
    pub fn observe_on(self, scheduler: SchedulerRef, prefetch: usize) -> Flowable<T> {
        let prefetch = prefetch.max(1);
        Flowable::create(move |downstream: Subscriber<T>| {
            let parent = downstream.subscription().clone();
            let worker = worker_for(&scheduler, &parent);
            let state = Arc::new(FlowObserveOn {
                queue: DeliveryQueue::new(),
                worker,
                downstream,
                upstream: OnceLock::new(),
                prefetch,
                limit: (prefetch - prefetch / 4).max(1),
                consumed: AtomicUsize::new(0),
            });
            let upstream = self.subscribe_with(Subscriber::linked(
                &parent,
                ObserveOnInput {
                    state: state.clone(),
                },
            ));
            let _ = state.upstream.set(upstream.clone());
            upstream.request(prefetch as u64);
            Demand::new(Arc::new(ObserveOnDemand { state }), parent)
        })
    }

    /// Drop demand tracking, requesting everything upstream
    pub fn to_observable(self) -> Observable<T> {
        Observable::create(move |subscriber| {
            self.subscribe_with(subscriber).request(u64::MAX);
        })
    }
}

impl Flowable<i64> {
    /// Emit `count` consecutive integers starting at `start` as demand allows
    pub fn range(start: i64, count: u64) -> Self {
        let end = start.saturating_add(i64::try_from(count).unwrap_or(i64::MAX));
        Self::from_iter(start..end)
    }
}

struct FlowStage<S, U, T> {
    stage: S,
    downstream: Subscriber<U>,
    upstream: Arc<OnceLock<Demand>>,
    _input: PhantomData<fn(T)>,
}

impl<T, U, S> Observer<T> for FlowStage<S, U, T>
where
    T: Send + 'static,
    U: Send + 'static,
    S: Stage<T, U>,
{
    fn on_next(&mut self, value: T) {
        let mut emitted = false;
        for event in self.stage.process(crate::event::Event::Next(value)) {
            emitted |= event.is_next();
            self.downstream.emit(event);
        }
        if !emitted {
            if let Some(upstream) = self.upstream.get() {
                upstream.request(1);
            }
        }
    }

    fn on_error(&mut self, error: StreamError) {
        for event in self.stage.process(crate::event::Event::Error(error)) {
            self.downstream.emit(event);
        }
    }

    fn on_complete(&mut self) {
        for event in self.stage.process(crate::event::Event::Complete) {
            self.downstream.emit(event);
        }
    }
}

struct FlowObserveOn<T> {
    queue: DeliveryQueue<T>,
    worker: WorkerRef,
    downstream: Subscriber<T>,
    upstream: OnceLock<Demand>,
    prefetch: usize,
    limit: usize,
    consumed: AtomicUsize,
}

impl<T: Send + 'static> FlowObserveOn<T> {
    fn schedule(self: &Arc<Self>) {
        if self.queue.enter() {
            let me = self.clone();
            self.worker.schedule(
                Box::new(move || {
                    guarded(&me.downstream, || {
                        me.queue.drain_owned(&me.downstream, || me.replenish())
                    });
                }),
                Duration::ZERO,
            );
        }
    }

    fn replenish(&self) {
        let consumed = self.consumed.fetch_add(1, Ordering::AcqRel) + 1;
        if consumed >= self.limit {
            self.consumed.store(0, Ordering::Release);
            if let Some(upstream) = self.upstream.get() {
                upstream.request(self.limit as u64);
            }
        }
    }
}

struct ObserveOnInput<T> {
    state: Arc<FlowObserveOn<T>>,
}

impl<T: Send + 'static> Observer<T> for ObserveOnInput<T> {
    fn on_next(&mut self, value: T) {
        let prefetch = self.state.prefetch;
        let overflowed = {
            let mut queue = self.state.queue.state();
            if queue.terminal.is_some() {
                return;
            }
            if queue.items.len() >= prefetch {
                queue.items.clear();
                queue.terminal = Some(Terminal::Error(StreamError::BackpressureOverflow {
                    capacity: prefetch,
                }));
                true
            } else {
                queue.items.push_back(value);
                false
            }
        };
        if overflowed {
            warn!(prefetch, "upstream ignored demand; prefetch buffer overflowed");
            if let Some(upstream) = self.state.upstream.get() {
                upstream.cancel();
            }
        }
        self.state.schedule();
    }

    fn on_error(&mut self, error: StreamError) {
        self.state
            .queue
            .state()
            .terminal
            .get_or_insert(Terminal::Error(error));
        self.state.schedule();
    }

    fn on_complete(&mut self) {
        self.state
            .queue
            .state()
            .terminal
            .get_or_insert(Terminal::Complete);
        self.state.schedule();
    }
}

struct ObserveOnDemand<T> {
    state: Arc<FlowObserveOn<T>>,
}

impl<T: Send + 'static> Producer for ObserveOnDemand<T> {
    fn request(&self, n: u64) {
        self.state.queue.add_demand(n);
        self.state.schedule();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{LaneScheduler, VirtualTimeScheduler};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_range_honours_demand() {
        let observer = Flowable::range(1, 10).test(3);
        observer.assert_values(&[1, 2, 3]).assert_not_complete();

        observer.request(2);
        observer.assert_values(&[1, 2, 3, 4, 5]);

        observer.request(100);
        observer.assert_value_count(10).assert_complete();
    }

    #[test]
    fn test_auto_request_drains_without_recursion_blowup() {
        let observer = Flowable::range(0, 50_000).test_with(TestObserver::with_auto_request(1), 1);
        observer.assert_value_count(50_000).assert_complete();
    }

    #[test]
    fn test_filter_replenishes_swallowed_items() {
        let observer = Flowable::range(1, 10)
            .filter(|v| v % 2 == 0)
            .map(|v| v * 10)
            .test(2);
        observer.assert_values(&[20, 40]).assert_not_complete();
        observer.request(10);
        observer
            .assert_values(&[20, 40, 60, 80, 100])
            .assert_complete();
    }

    #[test]
    fn test_cancel_stops_producer() {
        let observer = Flowable::range(1, 10).test(2);
        observer.dispose();
        observer.request(5);
        observer.assert_values(&[1, 2]).assert_not_complete();
    }

    #[test]
    fn test_observe_on_virtual_lane() {
        let scheduler = VirtualTimeScheduler::new();
        let observer = Flowable::range(1, 20)
            .observe_on(scheduler.shared(), 4)
            .test(5);

        observer.assert_value_count(0);
        scheduler.trigger_due_tasks();
        observer.assert_values(&[1, 2, 3, 4, 5]).assert_not_complete();

        observer.request(u64::MAX);
        scheduler.trigger_due_tasks();
        observer.assert_value_count(20).assert_complete();
    }

    #[test]
    fn test_observe_on_dedicated_lane_keeps_order() {
        let observer = Flowable::range(0, 1_000)
            .observe_on(Arc::new(LaneScheduler::new("flow-lane")), 16)
            .test_with(TestObserver::with_auto_request(1), 1);

        assert!(observer.await_terminal(Duration::from_secs(5)));
        let values = observer.values();
        assert_eq!(values, (0..1_000).collect::<Vec<_>>());
    }

    #[test]
    fn test_to_observable_requests_everything() {
        Flowable::range(1, 3)
            .to_observable()
            .test()
            .assert_values(&[1, 2, 3])
            .assert_complete();
    }

    #[test]
    fn test_empty_and_error() {
        Flowable::<i32>::empty().test(0).assert_complete();
        Flowable::<i32>::error(StreamError::source("bad"))
            .test(1)
            .assert_error(StreamError::source("bad"));
    }
}
