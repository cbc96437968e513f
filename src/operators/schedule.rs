// Copyright (c) 2025 - Cowboy AI, Inc.
//! Moving work between schedulers.
//!
//! `subscribe_on` decides where the subscription side effect runs (and with
//! it a synchronous source's emissions). `observe_on` decides where
//! downstream observers are called. Both hop through one worker per
//! subscription, so event order is preserved across the hop.
//! `unsubscribe_on` moves only the disposal of upstream.

use super::error::Forward;
use crate::errors::StreamError;
use crate::event::Event;
use crate::observable::Observable;
use crate::observer::Observer;
use crate::scheduler::{contain, worker_for, SchedulerRef, WorkerRef};
use crate::subscription::{Subscriber, Subscription};
use crate::sync::{lock, WorkInProgress};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{trace, warn};

struct ObserveOn<T> {
    downstream: Subscriber<T>,
    worker: WorkerRef,
    queue: Mutex<VecDeque<Event<T>>>,
    wip: WorkInProgress,
}

impl<T: Send + 'static> ObserveOn<T> {
    fn push(self: &Arc<Self>, event: Event<T>) {
        lock(&self.queue).push_back(event);
        if self.wip.enter() {
            let me = self.clone();
            self.worker.schedule(Box::new(move || me.drain()), Duration::ZERO);
        }
    }

    /// Deliver everything queued, on the worker
    ///
    /// A panicking downstream callback fails the stream with `TaskFailed`;
    /// the worker stays usable and the drain is not rescheduled.
    fn drain(&self) {
        if let Err(message) = contain(|| self.drain_queue()) {
            warn!(panic = %message, "observer panicked on worker");
            lock(&self.queue).clear();
            self.downstream.error(StreamError::TaskFailed(message));
        }
    }

    fn drain_queue(&self) {
        loop {
            loop {
                let event = lock(&self.queue).pop_front();
                match event {
                    Some(event) => {
                        if self.downstream.is_closed() {
                            lock(&self.queue).clear();
                            return;
                        }
                        self.downstream.emit(event);
                    }
                    None => break,
                }
            }
            if !self.wip.leave() {
                return;
            }
        }
    }
}

struct ObserveOnInput<T> {
    observe_on: Arc<ObserveOn<T>>,
}

impl<T: Send + 'static> Observer<T> for ObserveOnInput<T> {
    fn on_next(&mut self, value: T) {
        self.observe_on.push(Event::Next(value));
    }

    fn on_error(&mut self, error: StreamError) {
        self.observe_on.push(Event::Error(error));
    }

    fn on_complete(&mut self) {
        self.observe_on.push(Event::Complete);
    }
}

impl<T: Send + 'static> Observable<T> {
    /// Subscribe to this source on a worker of `scheduler`
    ///
    /// A panic raised while subscribing is delivered as
    /// [`StreamError::TaskFailed`].
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// // the blocking read runs on a lane thread, not the caller's
    /// Observable::defer(read_config_lines)
    ///     .subscribe_on(scheduler::new_lane())
    ///     .subscribe(LoggingObserver::new("config"));
    /// ```
    pub fn subscribe_on(self, scheduler: SchedulerRef) -> Observable<T> {
        Observable::create(move |downstream: Subscriber<T>| {
            let worker = worker_for(&scheduler, downstream.subscription());
            let source = self.clone();
            worker.schedule(
                Box::new(move || {
                    let target = downstream.clone();
                    if let Err(message) = contain(move || source.subscribe_with(target)) {
                        warn!(panic = %message, "subscription work panicked");
                        downstream.error(StreamError::TaskFailed(message));
                    }
                }),
                Duration::ZERO,
            );
        })
    }

    /// Deliver every event to downstream on a worker of `scheduler`
    ///
    /// Events queue without bound until the worker gets to them; an error
    /// arrives after the values queued before it.
    pub fn observe_on(self, scheduler: SchedulerRef) -> Observable<T> {
        Observable::create(move |downstream: Subscriber<T>| {
            let parent = downstream.subscription().clone();
            let observe_on = Arc::new(ObserveOn {
                downstream,
                worker: worker_for(&scheduler, &parent),
                queue: Mutex::new(VecDeque::new()),
                wip: WorkInProgress::new(),
            });
            self.subscribe_with(Subscriber::linked(
                &parent,
                ObserveOnInput { observe_on },
            ));
        })
    }

    /// Run the disposal of upstream on `scheduler` instead of the thread
    /// that disposes downstream
    ///
    /// Useful when tearing a source down blocks, such as closing a socket.
    pub fn unsubscribe_on(self, scheduler: SchedulerRef) -> Observable<T> {
        Observable::create(move |downstream: Subscriber<T>| {
            let upstream = Subscription::new();
            let target = upstream.clone();
            let scheduler = scheduler.clone();
            downstream.subscription().add_teardown(move || {
                trace!(subscription = %target.id(), "moving upstream disposal");
                scheduler.schedule_direct(Box::new(move || target.dispose()), Duration::ZERO);
            });
            self.subscribe_with(Subscriber::with_subscription(
                Forward { downstream },
                upstream,
            ));
        })
    }
}
