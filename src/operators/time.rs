// Copyright (c) 2025 - Cowboy AI, Inc.
//! Time-based operators.
//!
//! Each operator takes the [`SchedulerRef`] whose clock it reads and whose
//! workers run its timers, so the same pipeline runs against wall-clock
//! lanes in production and a
//! [`VirtualTimeScheduler`](crate::scheduler::VirtualTimeScheduler) in tests.
//!
//! | Operator | Emits |
//! |----------|-------|
//! | `debounce(d)` | a value once `d` passed without a newer one |
//! | `throttle_first(d)` | the first value, then nothing for `d` |
//! | `sample(p)` | the latest value once per period `p`, if it changed |
//! | `timeout(d)` | an error when no value arrives within `d` |
//! | `timeout_or(d, f)` | switches to `f` when no value arrives within `d` |
//! | `delay(d)` | every value and the completion, `d` later |
//! | `delay_subscription(d)` | everything, subscribing `d` later |
//! | `time_interval()` | values paired with time since the previous one |
//! | `timestamp()` | values stamped with wall-clock time |

use super::error::Forward;
use super::stage::FnStage;
use crate::errors::StreamError;
use crate::event::{Event, TimeInterval, Timestamped};
use crate::observable::Observable;
use crate::observer::Observer;
use crate::scheduler::{guarded, schedule_periodic, worker_for, SchedulerRef, WorkerRef};
use crate::subscription::{SerialSubscription, Subscriber, Subscription};
use crate::sync::lock;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

struct Debounce<T> {
    downstream: Subscriber<T>,
    worker: WorkerRef,
    timer: SerialSubscription,
    quiet: Duration,
    state: Mutex<DebounceState<T>>,
}

struct DebounceState<T> {
    latest: Option<T>,
    index: u64,
}

impl<T: Send + 'static> Debounce<T> {
    /// Emit the pending value if no newer one arrived since `index`
    ///
    /// The value is queued on the downstream subscriber while the state lock
    /// is held, so a concurrent completion always lands after it.
    fn fire(&self, index: u64) {
        let queued = {
            let mut state = lock(&self.state);
            if state.index != index {
                return;
            }
            match state.latest.take() {
                Some(value) => self.downstream.enqueue(Event::Next(value)),
                None => false,
            }
        };
        if queued {
            guarded(&self.downstream, || self.downstream.drain());
        }
    }
}

struct DebounceInput<T> {
    debounce: Arc<Debounce<T>>,
}

impl<T: Send + 'static> Observer<T> for DebounceInput<T> {
    fn on_next(&mut self, value: T) {
        let index = {
            let mut state = lock(&self.debounce.state);
            state.index += 1;
            state.latest = Some(value);
            state.index
        };
        let debounce = self.debounce.clone();
        let handle = self
            .debounce
            .worker
            .schedule(Box::new(move || debounce.fire(index)), self.debounce.quiet);
        self.debounce.timer.replace(handle);
    }

    fn on_error(&mut self, error: StreamError) {
        self.debounce.timer.dispose();
        self.debounce.downstream.error(error);
    }

    fn on_complete(&mut self) {
        self.debounce.timer.dispose();
        let downstream = &self.debounce.downstream;
        let queued = {
            let mut state = lock(&self.debounce.state);
            let flushed = state
                .latest
                .take()
                .map_or(false, |value| downstream.enqueue(Event::Next(value)));
            downstream.enqueue(Event::Complete) || flushed
        };
        if queued {
            downstream.drain();
        }
    }
}

/// Index value marking a timed-out subscription
const TIMED_OUT: u64 = u64::MAX;

struct Timeout<T> {
    downstream: Subscriber<T>,
    upstream: Subscription,
    worker: WorkerRef,
    timer: SerialSubscription,
    window: Duration,
    fallback: Option<Observable<T>>,
    index: AtomicU64,
}

impl<T: Send + 'static> Timeout<T> {
    fn arm(self: &Arc<Self>, index: u64) {
        let timeout = self.clone();
        let handle = self.worker.schedule(
            Box::new(move || {
                let downstream = timeout.downstream.clone();
                guarded(&downstream, || timeout.expire(index));
            }),
            self.window,
        );
        self.timer.replace(handle);
    }

    fn expire(&self, index: u64) {
        if self
            .index
            .compare_exchange(index, TIMED_OUT, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.upstream.dispose();
        match &self.fallback {
            Some(fallback) => {
                debug!(window = ?self.window, "timed out; switching to fallback");
                fallback.subscribe_with(Subscriber::linked(
                    self.downstream.subscription(),
                    Forward {
                        downstream: self.downstream.clone(),
                    },
                ));
            }
            None => self.downstream.error(StreamError::Timeout(self.window)),
        }
    }

    /// Claim the terminal slot; false once the timer already fired
    fn finish(&self) -> bool {
        if self.index.swap(TIMED_OUT, Ordering::AcqRel) == TIMED_OUT {
            return false;
        }
        self.timer.dispose();
        true
    }
}

struct TimeoutInput<T> {
    timeout: Arc<Timeout<T>>,
}

impl<T: Send + 'static> Observer<T> for TimeoutInput<T> {
    fn on_next(&mut self, value: T) {
        let index = self.timeout.index.load(Ordering::Acquire);
        if index == TIMED_OUT
            || self
                .timeout
                .index
                .compare_exchange(index, index + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return;
        }
        self.timeout.downstream.next(value);
        self.timeout.arm(index + 1);
    }

    fn on_error(&mut self, error: StreamError) {
        if self.timeout.finish() {
            self.timeout.downstream.error(error);
        }
    }

    fn on_complete(&mut self) {
        if self.timeout.finish() {
            self.timeout.downstream.complete();
        }
    }
}

struct SampleInput<T> {
    latest: Arc<Mutex<Option<T>>>,
    downstream: Subscriber<T>,
    ticker: Subscription,
}

impl<T: Send + 'static> Observer<T> for SampleInput<T> {
    fn on_next(&mut self, value: T) {
        *lock(&self.latest) = Some(value);
    }

    fn on_error(&mut self, error: StreamError) {
        self.ticker.dispose();
        self.downstream.error(error);
    }

    fn on_complete(&mut self) {
        self.ticker.dispose();
        self.downstream.complete();
    }
}

struct DelayInput<T> {
    downstream: Subscriber<T>,
    worker: WorkerRef,
    delay: Duration,
}

impl<T: Send + 'static> Observer<T> for DelayInput<T> {
    fn on_next(&mut self, value: T) {
        let downstream = self.downstream.clone();
        self.worker.schedule(
            Box::new(move || guarded(&downstream, || downstream.next(value))),
            self.delay,
        );
    }

    fn on_error(&mut self, error: StreamError) {
        self.downstream.error(error);
    }

    fn on_complete(&mut self) {
        let downstream = self.downstream.clone();
        self.worker.schedule(
            Box::new(move || guarded(&downstream, || downstream.complete())),
            self.delay,
        );
    }
}

impl<T: Send + 'static> Observable<T> {
    /// Emit a value only after `quiet` passed without a newer one
    ///
    /// A pending value is flushed on completion and dropped on error.
    pub fn debounce(self, quiet: Duration, scheduler: SchedulerRef) -> Observable<T> {
        Observable::create(move |downstream: Subscriber<T>| {
            let parent = downstream.subscription().clone();
            let timer = SerialSubscription::new();
            timer.bind(&parent);
            let debounce = Arc::new(Debounce {
                downstream,
                worker: worker_for(&scheduler, &parent),
                timer,
                quiet,
                state: Mutex::new(DebounceState {
                    latest: None,
                    index: 0,
                }),
            });
            self.subscribe_with(Subscriber::linked(&parent, DebounceInput { debounce }));
        })
    }

    /// Fail with [`StreamError::Timeout`] when no value arrives within
    /// `window` of subscription or of the previous value
    pub fn timeout(self, window: Duration, scheduler: SchedulerRef) -> Observable<T> {
        self.timing_out(window, None, scheduler)
    }

    /// Like [`Observable::timeout`] but continue with `fallback` instead of
    /// failing
    pub fn timeout_or(
        self,
        window: Duration,
        fallback: Observable<T>,
        scheduler: SchedulerRef,
    ) -> Observable<T> {
        self.timing_out(window, Some(fallback), scheduler)
    }

    fn timing_out(
        self,
        window: Duration,
        fallback: Option<Observable<T>>,
        scheduler: SchedulerRef,
    ) -> Observable<T> {
        Observable::create(move |downstream: Subscriber<T>| {
            let parent = downstream.subscription().clone();
            let upstream = Subscription::new();
            parent.add(upstream.clone());
            let timer = SerialSubscription::new();
            timer.bind(&parent);
            let timeout = Arc::new(Timeout {
                downstream,
                upstream: upstream.clone(),
                worker: worker_for(&scheduler, &parent),
                timer,
                window,
                fallback: fallback.clone(),
                index: AtomicU64::new(0),
            });
            timeout.arm(0);
            self.subscribe_with(Subscriber::with_subscription(
                TimeoutInput { timeout },
                upstream,
            ));
        })
    }

    /// Emit the most recent value once per `period`, skipping periods
    /// without a new value
    ///
    /// A value still waiting when upstream completes is not emitted.
    pub fn sample(self, period: Duration, scheduler: SchedulerRef) -> Observable<T> {
        Observable::create(move |downstream: Subscriber<T>| {
            let parent = downstream.subscription().clone();
            let worker = worker_for(&scheduler, &parent);
            let latest = Arc::new(Mutex::new(None));
            let sampled = latest.clone();
            let emitter = downstream.clone();
            let ticker = schedule_periodic(&worker, period, period, move || {
                let sample = lock(&sampled).take();
                if let Some(value) = sample {
                    guarded(&emitter, || emitter.next(value));
                }
            });
            parent.add(ticker.clone());
            self.subscribe_with(Subscriber::linked(
                &parent,
                SampleInput {
                    latest,
                    downstream,
                    ticker,
                },
            ));
        })
    }

    /// Emit a value, then ignore everything for `window`
    pub fn throttle_first(self, window: Duration, scheduler: SchedulerRef) -> Observable<T> {
        self.lift(move || {
            let scheduler = scheduler.clone();
            let mut open_at: Option<Duration> = None;
            FnStage::new(move |event: Event<T>| match event {
                Event::Next(value) => {
                    let now = scheduler.now();
                    if open_at.map_or(true, |gate| now >= gate) {
                        open_at = Some(now + window);
                        vec![Event::Next(value)]
                    } else {
                        Vec::new()
                    }
                }
                other => vec![other],
            })
        })
    }

    /// Shift every value and the completion `delay` later
    ///
    /// Errors are passed on immediately and drop values still in flight.
    pub fn delay(self, delay: Duration, scheduler: SchedulerRef) -> Observable<T> {
        Observable::create(move |downstream: Subscriber<T>| {
            let parent = downstream.subscription().clone();
            let worker = worker_for(&scheduler, &parent);
            self.subscribe_with(Subscriber::linked(
                &parent,
                DelayInput {
                    downstream,
                    worker,
                    delay,
                },
            ));
        })
    }

    /// Subscribe to this source only after `delay`
    pub fn delay_subscription(self, delay: Duration, scheduler: SchedulerRef) -> Observable<T> {
        Observable::create(move |downstream: Subscriber<T>| {
            let worker = worker_for(&scheduler, downstream.subscription());
            let source = self.clone();
            worker.schedule(
                Box::new(move || {
                    let target = downstream.clone();
                    guarded(&downstream, move || source.subscribe_with(target));
                }),
                delay,
            );
        })
    }

    /// Pair each value with the time elapsed on `scheduler` since the
    /// previous value, or since subscription for the first one
    pub fn time_interval(self, scheduler: SchedulerRef) -> Observable<TimeInterval<T>> {
        self.lift(move || {
            let scheduler = scheduler.clone();
            let mut last = scheduler.now();
            FnStage::new(move |event: Event<T>| {
                vec![event.map(|value| {
                    let now = scheduler.now();
                    let interval = now.saturating_sub(last);
                    last = now;
                    TimeInterval { value, interval }
                })]
            })
        })
    }

    /// Stamp each value with the current UTC time
    pub fn timestamp(self) -> Observable<Timestamped<T>> {
        self.map(|value| Timestamped {
            value,
            timestamp: Utc::now(),
        })
    }
}
