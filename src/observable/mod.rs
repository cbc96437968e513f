// Copyright (c) 2025 - Cowboy AI, Inc.
//! Observables
//!
//! An [`Observable<T>`] is a recipe for producing events: a shared function
//! that, given a [`Subscriber<T>`], starts delivering `Next` values followed
//! by at most one terminal event. Subscribing twice runs the recipe twice, so
//! every observable built here is cold; hot sharing lives in [`crate::hot`].
//!
//! # Creation
//!
//! | Constructor | Emits |
//! |-------------|-------|
//! | `create(f)` | whatever `f` pushes into the subscriber |
//! | `just(v)` | `v`, then completes |
//! | `from_iter(items)` | each item, then completes |
//! | `range(start, count)` | `start..start + count`, then completes |
//! | `empty()` / `never()` / `error(e)` | complete / nothing / `e` |
//! | `defer(f)` | a fresh observable from `f` per subscriber |
//! | `using(r, f, release)` | `f`'s events over a resource released on teardown |
//! | `interval(p, s)` / `timer(d, s)` | ticks on scheduler `s` |
//!
//! # Example
//!
//! ```rust,ignore
//! use cim_reactive::prelude::*;
//!
//! let subscription = Observable::range(0, 10)
//!     .filter(|v| v % 2 == 0)
//!     .count()
//!     .subscribe(LoggingObserver::new("count"));
//! ```

pub mod blocking;

use crate::errors::StreamError;
use crate::observer::{FnObserver, NextObserver, Observer};
use crate::scheduler::{guarded, schedule_periodic, worker_for, SchedulerRef};
use crate::subscription::{Subscriber, Subscription};
use crate::testing::TestObserver;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

type OnSubscribe<T> = Arc<dyn Fn(Subscriber<T>) + Send + Sync>;

/// A cold, push-based sequence of events
pub struct Observable<T> {
    on_subscribe: OnSubscribe<T>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            on_subscribe: self.on_subscribe.clone(),
        }
    }
}

impl<T: Send + 'static> Observable<T> {
    /// Create an observable from a subscribe function
    ///
    /// The function runs once per subscriber and pushes events into the
    /// [`Subscriber`] it is given. It should stop producing once
    /// [`Subscriber::is_closed`] turns true.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let source = Observable::create(|s: Subscriber<i32>| {
    ///     s.next(1);
    ///     s.next(2);
    ///     s.complete();
    /// });
    /// ```
    pub fn create<F>(on_subscribe: F) -> Self
    where
        F: Fn(Subscriber<T>) + Send + Sync + 'static,
    {
        Self {
            on_subscribe: Arc::new(on_subscribe),
        }
    }

    /// Emit every item of `items`, then complete
    ///
    /// `items` is cloned per subscriber so each gets the full sequence.
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
    {
        Self::create(move |subscriber| {
            for item in items.clone() {
                if subscriber.is_closed() {
                    return;
                }
                subscriber.next(item);
            }
            subscriber.complete();
        })
    }

    /// Emit a single value, then complete
    pub fn just(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_iter(std::iter::once(value))
    }

    /// Complete immediately
    pub fn empty() -> Self {
        Self::create(|subscriber| subscriber.complete())
    }

    /// Never emit anything
    pub fn never() -> Self {
        Self::create(|_| {})
    }

    /// Fail immediately with `error`
    pub fn error(error: StreamError) -> Self {
        Self::create(move |subscriber| subscriber.error(error.clone()))
    }

    /// Build a fresh observable per subscriber
    pub fn defer<F>(factory: F) -> Self
    where
        F: Fn() -> Observable<T> + Send + Sync + 'static,
    {
        Self::create(move |subscriber| factory().subscribe_with(subscriber))
    }

    /// Tie a resource to the lifetime of each subscription
    ///
    /// `resource` runs on subscribe and `source` builds the stream from it.
    /// The resource goes to `release` once the subscription terminates or is
    /// disposed, whichever comes first.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let lines = Observable::using(
    ///     || open_log("events.log"),
    ///     |log| Observable::from_iter(log.lines()),
    ///     |log| log.close(),
    /// );
    /// ```
    pub fn using<R, RF, SF, DF>(resource: RF, source: SF, release: DF) -> Self
    where
        R: Send + 'static,
        RF: Fn() -> R + Send + Sync + 'static,
        SF: Fn(&R) -> Observable<T> + Send + Sync + 'static,
        DF: Fn(R) + Send + Sync + 'static,
    {
        let release = Arc::new(release);
        Self::create(move |subscriber| {
            let held = resource();
            let stream = source(&held);
            let release = release.clone();
            subscriber.subscription().add_teardown(move || release(held));
            stream.subscribe_with(subscriber);
        })
    }

    /// Hand an already wrapped subscriber to this observable
    pub fn subscribe_with(&self, subscriber: Subscriber<T>) {
        if subscriber.subscription().is_disposed() {
            return;
        }
        (self.on_subscribe)(subscriber)
    }

    /// Subscribe an observer
    ///
    /// # Returns
    ///
    /// The subscription; dispose it to stop delivery and release upstream
    /// resources.
    pub fn subscribe<O>(&self, observer: O) -> Subscription
    where
        O: Observer<T> + 'static,
    {
        let subscriber = Subscriber::new(observer);
        let subscription = subscriber.subscription().clone();
        self.subscribe_with(subscriber);
        subscription
    }

    /// Subscribe with next, error and completion handlers
    pub fn subscribe_fn<N, E, C>(&self, next: N, error: E, complete: C) -> Subscription
    where
        N: FnMut(T) + Send + 'static,
        E: FnMut(StreamError) + Send + 'static,
        C: FnMut() + Send + 'static,
    {
        self.subscribe(FnObserver::new(next, error, complete))
    }

    /// Subscribe with only a value handler
    ///
    /// A failure has nowhere to go, so it is reported through
    /// `tracing::error!` as an unhandled stream error.
    pub fn subscribe_next<N>(&self, next: N) -> Subscription
    where
        N: FnMut(T) + Send + 'static,
    {
        self.subscribe(NextObserver::new(next))
    }

    /// Subscribe a fresh [`TestObserver`] and return it
    pub fn test(&self) -> TestObserver<T> {
        let observer = TestObserver::new();
        let subscription = self.subscribe(observer.clone());
        observer.attach(subscription);
        observer
    }
}

impl Observable<i64> {
    /// Emit `count` consecutive integers starting at `start`
    pub fn range(start: i64, count: u64) -> Self {
        let end = start.saturating_add(i64::try_from(count).unwrap_or(i64::MAX));
        Self::from_iter(start..end)
    }
}

impl Observable<u64> {
    /// Emit 0, 1, 2, ... every `period` on `scheduler`
    pub fn interval(period: Duration, scheduler: SchedulerRef) -> Self {
        Self::interval_with_delay(period, period, scheduler)
    }

    /// Like [`Observable::interval`] but with a distinct first delay
    pub fn interval_with_delay(
        initial_delay: Duration,
        period: Duration,
        scheduler: SchedulerRef,
    ) -> Self {
        Self::create(move |subscriber| {
            let worker = worker_for(&scheduler, subscriber.subscription());
            let counter = AtomicU64::new(0);
            let emitter = subscriber.clone();
            let ticks = schedule_periodic(&worker, initial_delay, period, move || {
                guarded(&emitter, || emitter.next(counter.fetch_add(1, Ordering::Relaxed)));
            });
            subscriber.subscription().add(ticks);
        })
    }

    /// Emit `0` once after `delay` on `scheduler`, then complete
    pub fn timer(delay: Duration, scheduler: SchedulerRef) -> Self {
        Self::create(move |subscriber| {
            let worker = worker_for(&scheduler, subscriber.subscription());
            let emitter = subscriber.clone();
            let handle = worker.schedule(
                Box::new(move || {
                    guarded(&emitter, || {
                        emitter.next(0);
                        emitter.complete();
                    });
                }),
                delay,
            );
            subscriber.subscription().add(handle);
        })
    }
}
