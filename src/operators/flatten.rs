// Copyright (c) 2025 - Cowboy AI, Inc.
//! Higher-order flattening: each upstream value maps to an inner source.
//!
//! | Operator | Inner sources |
//! |----------|---------------|
//! | `flat_map` | all subscribed at once, events interleaved |
//! | `concat_map` | one at a time, in upstream order |
//! | `switch_map` | only the most recent; older ones are disposed |
//!
//! `switch_on_next` is `switch_map` over a source that already emits
//! observables.

use crate::errors::StreamError;
use crate::observable::Observable;
use crate::observer::Observer;
use crate::subscription::{SerialSubscription, Subscriber, Subscription};
use crate::sync::{lock, WorkInProgress};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Shared completion bookkeeping for merged sources
struct Merge<U> {
    downstream: Subscriber<U>,
    /// Upstream plus every inner source still running
    active: AtomicUsize,
    delay_errors: bool,
    deferred: Mutex<Option<StreamError>>,
}

impl<U: Send + 'static> Merge<U> {
    fn new(downstream: Subscriber<U>, delay_errors: bool) -> Arc<Self> {
        Arc::new(Self {
            downstream,
            active: AtomicUsize::new(1),
            delay_errors,
            deferred: Mutex::new(None),
        })
    }

    fn fail(&self, error: StreamError) {
        if self.delay_errors {
            lock(&self.deferred).get_or_insert(error);
            self.finish_one();
        } else {
            self.downstream.error(error);
        }
    }

    fn finish_one(&self) {
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            match lock(&self.deferred).take() {
                Some(error) => self.downstream.error(error),
                None => self.downstream.complete(),
            }
        }
    }
}

struct MergeOuter<T, U> {
    merge: Arc<Merge<U>>,
    mapper: Arc<dyn Fn(T) -> Observable<U> + Send + Sync>,
    parent: Subscription,
}

impl<T: Send + 'static, U: Send + 'static> Observer<T> for MergeOuter<T, U> {
    fn on_next(&mut self, value: T) {
        self.merge.active.fetch_add(1, Ordering::AcqRel);
        let source = (self.mapper)(value);
        let inner = Subscription::new();
        self.parent.add(inner.clone());
        source.subscribe_with(Subscriber::with_subscription(
            MergeInner {
                merge: self.merge.clone(),
                parent: self.parent.clone(),
                inner: inner.clone(),
            },
            inner,
        ));
    }

    fn on_error(&mut self, error: StreamError) {
        self.merge.fail(error);
    }

    fn on_complete(&mut self) {
        self.merge.finish_one();
    }
}

struct MergeInner<U> {
    merge: Arc<Merge<U>>,
    parent: Subscription,
    inner: Subscription,
}

impl<U: Send + 'static> Observer<U> for MergeInner<U> {
    fn on_next(&mut self, value: U) {
        self.merge.downstream.next(value);
    }

    fn on_error(&mut self, error: StreamError) {
        self.parent.remove(&self.inner);
        self.merge.fail(error);
    }

    fn on_complete(&mut self) {
        self.parent.remove(&self.inner);
        self.merge.finish_one();
    }
}

struct ConcatMap<T, U> {
    downstream: Subscriber<U>,
    mapper: Arc<dyn Fn(T) -> Observable<U> + Send + Sync>,
    current: SerialSubscription,
    state: Mutex<ConcatState<T>>,
    wip: WorkInProgress,
}

struct ConcatState<T> {
    pending: VecDeque<T>,
    inner_active: bool,
    upstream_done: bool,
}

enum ConcatStep<T> {
    Subscribe(T),
    Complete,
    Idle,
}

impl<T: Send + 'static, U: Send + 'static> ConcatMap<T, U> {
    /// Start the next inner source once the previous one finished
    ///
    /// Trampolined: an inner source completing synchronously re-enters here
    /// and only bumps the work counter.
    fn drain(self: &Arc<Self>) {
        if !self.wip.enter() {
            return;
        }
        loop {
            loop {
                if self.downstream.is_closed() {
                    return;
                }
                let step = {
                    let mut state = lock(&self.state);
                    if state.inner_active {
                        ConcatStep::Idle
                    } else if let Some(value) = state.pending.pop_front() {
                        state.inner_active = true;
                        ConcatStep::Subscribe(value)
                    } else if state.upstream_done {
                        ConcatStep::Complete
                    } else {
                        ConcatStep::Idle
                    }
                };
                match step {
                    ConcatStep::Subscribe(value) => {
                        let inner = Subscription::new();
                        self.current.replace(inner.clone());
                        (self.mapper)(value).subscribe_with(Subscriber::with_subscription(
                            ConcatInner { concat: self.clone() },
                            inner,
                        ));
                    }
                    ConcatStep::Complete => {
                        self.downstream.complete();
                        return;
                    }
                    ConcatStep::Idle => break,
                }
            }
            if !self.wip.leave() {
                return;
            }
        }
    }
}

struct ConcatOuter<T, U> {
    concat: Arc<ConcatMap<T, U>>,
}

impl<T: Send + 'static, U: Send + 'static> Observer<T> for ConcatOuter<T, U> {
    fn on_next(&mut self, value: T) {
        lock(&self.concat.state).pending.push_back(value);
        self.concat.drain();
    }

    fn on_error(&mut self, error: StreamError) {
        self.concat.downstream.error(error);
    }

    fn on_complete(&mut self) {
        lock(&self.concat.state).upstream_done = true;
        self.concat.drain();
    }
}

struct ConcatInner<T, U> {
    concat: Arc<ConcatMap<T, U>>,
}

impl<T: Send + 'static, U: Send + 'static> Observer<U> for ConcatInner<T, U> {
    fn on_next(&mut self, value: U) {
        self.concat.downstream.next(value);
    }

    fn on_error(&mut self, error: StreamError) {
        self.concat.downstream.error(error);
    }

    fn on_complete(&mut self) {
        lock(&self.concat.state).inner_active = false;
        self.concat.drain();
    }
}

struct Switch<U> {
    downstream: Subscriber<U>,
    current: SerialSubscription,
    index: AtomicU64,
    state: Mutex<SwitchState>,
}

struct SwitchState {
    inner_active: bool,
    upstream_done: bool,
}

impl<U: Send + 'static> Switch<U> {
    fn is_current(&self, index: u64) -> bool {
        self.index.load(Ordering::Acquire) == index
    }
}

struct SwitchOuter<T, U> {
    switch: Arc<Switch<U>>,
    mapper: Arc<dyn Fn(T) -> Observable<U> + Send + Sync>,
}

impl<T: Send + 'static, U: Send + 'static> Observer<T> for SwitchOuter<T, U> {
    fn on_next(&mut self, value: T) {
        let index = self.switch.index.fetch_add(1, Ordering::AcqRel) + 1;
        let inner = Subscription::new();
        self.switch.current.replace(inner.clone());
        lock(&self.switch.state).inner_active = true;
        (self.mapper)(value).subscribe_with(Subscriber::with_subscription(
            SwitchInner {
                switch: self.switch.clone(),
                index,
            },
            inner,
        ));
    }

    fn on_error(&mut self, error: StreamError) {
        self.switch.downstream.error(error);
    }

    fn on_complete(&mut self) {
        let finished = {
            let mut state = lock(&self.switch.state);
            state.upstream_done = true;
            !state.inner_active
        };
        if finished {
            self.switch.downstream.complete();
        }
    }
}

struct SwitchInner<U> {
    switch: Arc<Switch<U>>,
    index: u64,
}

impl<U: Send + 'static> Observer<U> for SwitchInner<U> {
    fn on_next(&mut self, value: U) {
        if self.switch.is_current(self.index) {
            self.switch.downstream.next(value);
        }
    }

    fn on_error(&mut self, error: StreamError) {
        if self.switch.is_current(self.index) {
            self.switch.downstream.error(error);
        }
    }

    fn on_complete(&mut self) {
        if !self.switch.is_current(self.index) {
            return;
        }
        let finished = {
            let mut state = lock(&self.switch.state);
            state.inner_active = false;
            state.upstream_done
        };
        if finished {
            self.switch.downstream.complete();
        }
    }
}

impl<T: Send + 'static> Observable<T> {
    fn merge_map<U, F>(self, mapper: F, delay_errors: bool) -> Observable<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Observable<U> + Send + Sync + 'static,
    {
        let mapper: Arc<dyn Fn(T) -> Observable<U> + Send + Sync> = Arc::new(mapper);
        Observable::create(move |downstream: Subscriber<U>| {
            let parent = downstream.subscription().clone();
            let merge = Merge::new(downstream, delay_errors);
            self.subscribe_with(Subscriber::linked(
                &parent,
                MergeOuter {
                    merge,
                    mapper: mapper.clone(),
                    parent: parent.clone(),
                },
            ));
        })
    }

    /// Map each value to an inner source and merge all of them concurrently
    ///
    /// Completes once upstream and every inner source completed. The first
    /// error from anywhere terminates the result and disposes the rest.
    pub fn flat_map<U, F>(self, mapper: F) -> Observable<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Observable<U> + Send + Sync + 'static,
    {
        self.merge_map(mapper, false)
    }

    /// Map each value to an inner source, subscribing to them one after
    /// another in upstream order
    pub fn concat_map<U, F>(self, mapper: F) -> Observable<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Observable<U> + Send + Sync + 'static,
    {
        let mapper: Arc<dyn Fn(T) -> Observable<U> + Send + Sync> = Arc::new(mapper);
        Observable::create(move |downstream: Subscriber<U>| {
            let parent = downstream.subscription().clone();
            let current = SerialSubscription::new();
            current.bind(&parent);
            let concat = Arc::new(ConcatMap {
                downstream,
                mapper: mapper.clone(),
                current,
                state: Mutex::new(ConcatState {
                    pending: VecDeque::new(),
                    inner_active: false,
                    upstream_done: false,
                }),
                wip: WorkInProgress::new(),
            });
            self.subscribe_with(Subscriber::linked(&parent, ConcatOuter { concat }));
        })
    }

    /// Map each value to an inner source, forwarding only the latest one
    ///
    /// A new upstream value disposes the previous inner source.
    pub fn switch_map<U, F>(self, mapper: F) -> Observable<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Observable<U> + Send + Sync + 'static,
    {
        let mapper: Arc<dyn Fn(T) -> Observable<U> + Send + Sync> = Arc::new(mapper);
        Observable::create(move |downstream: Subscriber<U>| {
            let parent = downstream.subscription().clone();
            let current = SerialSubscription::new();
            current.bind(&parent);
            let switch = Arc::new(Switch {
                downstream,
                current,
                index: AtomicU64::new(0),
                state: Mutex::new(SwitchState {
                    inner_active: false,
                    upstream_done: false,
                }),
            });
            self.subscribe_with(Subscriber::linked(
                &parent,
                SwitchOuter {
                    switch,
                    mapper: mapper.clone(),
                },
            ));
        })
    }

    /// Merge `sources` concurrently, failing on the first error
    pub fn merge(sources: Vec<Observable<T>>) -> Observable<T> {
        Observable::from_iter(sources).flat_map(|source| source)
    }

    /// Merge `sources`, holding back the first error until all terminated
    pub fn merge_delay_error(sources: Vec<Observable<T>>) -> Observable<T> {
        Observable::from_iter(sources).merge_map(|source| source, true)
    }

    pub fn merge_with(self, other: Observable<T>) -> Observable<T> {
        Observable::merge(vec![self, other])
    }
}

impl<T: Send + 'static> Observable<Observable<T>> {
    /// Mirror the most recent inner source, disposing the one before it
    pub fn switch_on_next(self) -> Observable<T> {
        self.switch_map(|inner| inner)
    }
}
