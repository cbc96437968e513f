// Copyright (c) 2025 - Cowboy AI, Inc.
//! Error recovery.
//!
//! By default an error terminates the chain. These operators intercept it
//! before it reaches the subscriber:
//!
//! | Operator | On error |
//! |----------|----------|
//! | `retry(n)` | resubscribe, at most `n` times |
//! | `retry_while(p)` | resubscribe while `p(error, attempt)` holds |
//! | `retry_when(h)` | resubscribe when the signal `h(error, attempt)` emits |
//! | `on_error_return(f)` | emit `f(error)` and complete |
//! | `on_error_resume_next(f)` | continue with the source `f(error)` |
//!
//! Attempts are counted from 1 for the first failure.

use super::stage::FnStage;
use crate::errors::StreamError;
use crate::event::Event;
use crate::observable::Observable;
use crate::observer::Observer;
use crate::subscription::{SerialSubscription, Subscriber, Subscription};
use crate::sync::WorkInProgress;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

type RetryPredicate = Arc<dyn Fn(&StreamError, u64) -> bool + Send + Sync>;
type RetrySignal = Arc<dyn Fn(StreamError, u64) -> Observable<()> + Send + Sync>;

#[derive(Clone)]
enum RetryPolicy {
    Immediate(RetryPredicate),
    Signal(RetrySignal),
}

struct Retry<T> {
    source: Observable<T>,
    downstream: Subscriber<T>,
    policy: RetryPolicy,
    current: SerialSubscription,
    signal: SerialSubscription,
    failures: AtomicU64,
    wip: WorkInProgress,
}

impl<T: Send + 'static> Retry<T> {
    /// Subscribe to the source again
    ///
    /// Trampolined, so a source failing synchronously loops here instead of
    /// growing the stack.
    fn resubscribe(self: &Arc<Self>) {
        if !self.wip.enter() {
            return;
        }
        loop {
            if self.downstream.is_closed() {
                return;
            }
            let attempt = Subscription::new();
            self.current.replace(attempt.clone());
            self.source.subscribe_with(Subscriber::with_subscription(
                RetryInput { retry: self.clone() },
                attempt,
            ));
            if !self.wip.leave() {
                return;
            }
        }
    }

    fn on_failure(self: &Arc<Self>, error: StreamError) {
        let attempt = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        match &self.policy {
            RetryPolicy::Immediate(should_retry) => {
                if should_retry(&error, attempt) {
                    debug!(attempt, error = %error, "resubscribing after error");
                    self.resubscribe();
                } else {
                    debug!(attempt, error = %error, "giving up after error");
                    self.downstream.error(error);
                }
            }
            RetryPolicy::Signal(handler) => {
                let wait = Subscription::new();
                self.signal.replace(wait.clone());
                handler(error, attempt).subscribe_with(Subscriber::with_subscription(
                    SignalInput {
                        retry: self.clone(),
                        wait: wait.clone(),
                        attempt,
                    },
                    wait,
                ));
            }
        }
    }
}

struct RetryInput<T> {
    retry: Arc<Retry<T>>,
}

impl<T: Send + 'static> Observer<T> for RetryInput<T> {
    fn on_next(&mut self, value: T) {
        self.retry.downstream.next(value);
    }

    fn on_error(&mut self, error: StreamError) {
        self.retry.on_failure(error);
    }

    fn on_complete(&mut self) {
        self.retry.downstream.complete();
    }
}

struct SignalInput<T> {
    retry: Arc<Retry<T>>,
    wait: Subscription,
    attempt: u64,
}

impl<T: Send + 'static> Observer<()> for SignalInput<T> {
    fn on_next(&mut self, _: ()) {
        debug!(attempt = self.attempt, "retry signal fired; resubscribing");
        self.wait.dispose();
        self.retry.resubscribe();
    }

    fn on_error(&mut self, error: StreamError) {
        self.retry.downstream.error(error);
    }

    fn on_complete(&mut self) {
        self.retry.downstream.complete();
    }
}

/// Forwards every event to another subscriber
pub(crate) struct Forward<T> {
    pub(crate) downstream: Subscriber<T>,
}

impl<T: Send + 'static> Observer<T> for Forward<T> {
    fn on_next(&mut self, value: T) {
        self.downstream.next(value);
    }

    fn on_error(&mut self, error: StreamError) {
        self.downstream.error(error);
    }

    fn on_complete(&mut self) {
        self.downstream.complete();
    }
}

struct ResumeInput<T> {
    downstream: Subscriber<T>,
    fallback: Arc<dyn Fn(StreamError) -> Observable<T> + Send + Sync>,
    parent: Subscription,
}

impl<T: Send + 'static> Observer<T> for ResumeInput<T> {
    fn on_next(&mut self, value: T) {
        self.downstream.next(value);
    }

    fn on_error(&mut self, error: StreamError) {
        debug!(error = %error, "resuming with fallback source");
        (self.fallback)(error).subscribe_with(Subscriber::linked(
            &self.parent,
            Forward {
                downstream: self.downstream.clone(),
            },
        ));
    }

    fn on_complete(&mut self) {
        self.downstream.complete();
    }
}

impl<T: Send + 'static> Observable<T> {
    fn retrying(self, policy: RetryPolicy) -> Observable<T> {
        Observable::create(move |downstream: Subscriber<T>| {
            let parent = downstream.subscription().clone();
            let current = SerialSubscription::new();
            current.bind(&parent);
            let signal = SerialSubscription::new();
            signal.bind(&parent);
            let retry = Arc::new(Retry {
                source: self.clone(),
                downstream,
                policy: policy.clone(),
                current,
                signal,
                failures: AtomicU64::new(0),
                wip: WorkInProgress::new(),
            });
            retry.resubscribe();
        })
    }

    /// Resubscribe after an error, at most `times` times
    ///
    /// The error that exhausts the budget is passed on.
    pub fn retry(self, times: u64) -> Observable<T> {
        self.retry_while(move |_, attempt| attempt <= times)
    }

    /// Resubscribe after an error while `predicate(error, attempt)` holds
    pub fn retry_while<P>(self, predicate: P) -> Observable<T>
    where
        P: Fn(&StreamError, u64) -> bool + Send + Sync + 'static,
    {
        self.retrying(RetryPolicy::Immediate(Arc::new(predicate)))
    }

    /// Let a signal source decide whether and when to resubscribe
    ///
    /// After each error, `handler(error, attempt)` is subscribed. Its first
    /// value triggers a resubscription; completing without a value completes
    /// the result; failing fails it.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// // back off one second per attempt, give up after three
    /// source.retry_when(move |error, attempt| {
    ///     if attempt > 3 {
    ///         Observable::error(error)
    ///     } else {
    ///         Observable::timer(Duration::from_secs(attempt), scheduler.clone())
    ///     }
    /// })
    /// ```
    pub fn retry_when<U, H>(self, handler: H) -> Observable<T>
    where
        U: Send + 'static,
        H: Fn(StreamError, u64) -> Observable<U> + Send + Sync + 'static,
    {
        let signal: RetrySignal =
            Arc::new(move |error, attempt| handler(error, attempt).map(|_| ()));
        self.retrying(RetryPolicy::Signal(signal))
    }

    /// Replace an error with the value `f(error)` and complete
    pub fn on_error_return<F>(self, f: F) -> Observable<T>
    where
        F: Fn(StreamError) -> T + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move || {
            let f = f.clone();
            FnStage::new(move |event: Event<T>| match event {
                Event::Error(error) => vec![Event::Next(f(error)), Event::Complete],
                other => vec![other],
            })
        })
    }

    /// Continue with the source `f(error)` after an error
    pub fn on_error_resume_next<F>(self, f: F) -> Observable<T>
    where
        F: Fn(StreamError) -> Observable<T> + Send + Sync + 'static,
    {
        let fallback: Arc<dyn Fn(StreamError) -> Observable<T> + Send + Sync> = Arc::new(f);
        Observable::create(move |downstream: Subscriber<T>| {
            let parent = downstream.subscription().clone();
            self.subscribe_with(Subscriber::linked(
                &parent,
                ResumeInput {
                    downstream,
                    fallback: fallback.clone(),
                    parent: parent.clone(),
                },
            ));
        })
    }
}
