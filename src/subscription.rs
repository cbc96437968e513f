// Copyright (c) 2025 - Cowboy AI, Inc.
//! Subscriptions and Subscribers
//!
//! A [`Subscription`] is the cancellation side of one observer's link to a
//! pipeline. Disposing it is idempotent, runs every registered teardown once,
//! and disposes every child subscription registered with [`Subscription::add`].
//! Operators register their upstream subscriptions as children of the
//! downstream one, so disposal travels up the chain.
//!
//! A [`Subscriber`] is the emitting side handed to sources and operators. It
//! serializes concurrent emissions through a queue-drain loop so that the
//! wrapped observer never sees overlapping calls, enforces a single terminal
//! event, and drops everything once its subscription is disposed.
//!
//! ```rust,ignore
//! let subscription = Observable::interval(Duration::from_millis(10), lane)
//!     .subscribe(LoggingObserver::new("ticks"));
//!
//! // later, from any thread
//! subscription.dispose();
//! subscription.dispose(); // no-op
//! ```

use crate::errors::StreamError;
use crate::event::Event;
use crate::observer::Observer;
use crate::sync::lock;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;
use uuid::Uuid;

type Teardown = Box<dyn FnOnce() + Send>;

/// Cancellation handle for a subscription, a scheduled task or a connection
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

struct SubscriptionInner {
    id: Uuid,
    disposed: AtomicBool,
    teardowns: Mutex<Vec<Registered>>,
}

struct Registered {
    /// Id of the child this teardown disposes, if any
    child: Option<Uuid>,
    teardown: Teardown,
}

impl Subscription {
    /// Create a live subscription
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                id: Uuid::now_v7(),
                disposed: AtomicBool::new(false),
                teardowns: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a subscription that is already disposed
    pub fn disposed() -> Self {
        let subscription = Self::new();
        subscription.inner.disposed.store(true, Ordering::Release);
        subscription
    }

    /// Correlation id used in log output
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Dispose this subscription and everything registered with it
    ///
    /// Safe to call from any thread, any number of times.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let teardowns = std::mem::take(&mut *lock(&self.inner.teardowns));
        trace!(subscription = %self.inner.id, teardowns = teardowns.len(), "subscription disposed");
        for registered in teardowns {
            (registered.teardown)();
        }
    }

    /// Run `teardown` when this subscription is disposed
    ///
    /// Runs immediately if the subscription is already disposed.
    pub fn add_teardown<F>(&self, teardown: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.register(None, Box::new(teardown));
    }

    /// Dispose `child` together with this subscription
    pub fn add(&self, child: Subscription) {
        if Arc::ptr_eq(&self.inner, &child.inner) {
            return;
        }
        let id = child.id();
        self.register(Some(id), Box::new(move || child.dispose()));
    }

    /// Detach `child` without disposing it
    ///
    /// Operators that start many short-lived children call this when a
    /// child terminates, so the parent only holds the ones still running.
    pub fn remove(&self, child: &Subscription) {
        let id = child.id();
        lock(&self.inner.teardowns).retain(|registered| registered.child != Some(id));
    }

    /// Number of teardowns and children still registered
    pub(crate) fn teardown_count(&self) -> usize {
        lock(&self.inner.teardowns).len()
    }

    fn register(&self, child: Option<Uuid>, teardown: Teardown) {
        if !self.is_disposed() {
            let mut teardowns = lock(&self.inner.teardowns);
            // dispose() flips the flag before draining the list
            if !self.is_disposed() {
                teardowns.push(Registered { child, teardown });
                return;
            }
        }
        teardown();
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A slot holding one replaceable child subscription
///
/// Replacing the child disposes the previous one. Once the slot itself is
/// disposed, anything placed into it is disposed immediately. Used for the
/// current timer of `debounce`/`timeout` and the active inner source of
/// `switch_map`/`retry`.
#[derive(Clone, Default)]
pub struct SerialSubscription {
    inner: Arc<SerialInner>,
}

#[derive(Default)]
struct SerialInner {
    current: Mutex<Option<Subscription>>,
    disposed: AtomicBool,
}

impl SerialSubscription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `next`, disposing whatever was there before
    pub fn replace(&self, next: Subscription) {
        let previous = {
            let mut current = lock(&self.inner.current);
            if self.inner.disposed.load(Ordering::Acquire) {
                drop(current);
                next.dispose();
                return;
            }
            current.replace(next)
        };
        if let Some(previous) = previous {
            previous.dispose();
        }
    }

    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let current = lock(&self.inner.current).take();
        if let Some(current) = current {
            current.dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Dispose this slot when `parent` is disposed
    pub fn bind(&self, parent: &Subscription) {
        let slot = self.clone();
        parent.add_teardown(move || slot.dispose());
    }
}

/// Serialized, terminal-enforcing emitter wrapped around an observer
pub struct Subscriber<T> {
    inner: Arc<SubscriberInner<T>>,
}

struct SubscriberInner<T> {
    observer: Mutex<Option<Box<dyn Observer<T>>>>,
    serial: Mutex<Emission<T>>,
    subscription: Subscription,
}

struct Emission<T> {
    emitting: bool,
    done: bool,
    queue: VecDeque<Event<T>>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> Subscriber<T> {
    /// Wrap `observer` with a fresh subscription
    pub fn new<O>(observer: O) -> Self
    where
        O: Observer<T> + 'static,
    {
        Self::with_subscription(observer, Subscription::new())
    }

    /// Wrap `observer`, tying it to an existing subscription
    pub fn with_subscription<O>(observer: O, subscription: Subscription) -> Self
    where
        O: Observer<T> + 'static,
    {
        Self::from_boxed(Box::new(observer), subscription)
    }

    /// Wrap `observer` with a new subscription disposed together with `parent`
    pub fn linked<O>(parent: &Subscription, observer: O) -> Self
    where
        O: Observer<T> + 'static,
    {
        let subscription = Subscription::new();
        parent.add(subscription.clone());
        Self::with_subscription(observer, subscription)
    }

    pub fn from_boxed(observer: Box<dyn Observer<T>>, subscription: Subscription) -> Self {
        let inner = Arc::new(SubscriberInner {
            observer: Mutex::new(Some(observer)),
            serial: Mutex::new(Emission {
                emitting: false,
                done: false,
                queue: VecDeque::new(),
            }),
            subscription,
        });
        let weak = Arc::downgrade(&inner);
        inner.subscription.add_teardown(move || {
            if let Some(inner) = weak.upgrade() {
                // an observer disposing itself from inside a callback holds this lock
                if let Ok(mut observer) = inner.observer.try_lock() {
                    observer.take();
                }
            }
        });
        Self { inner }
    }

    pub fn subscription(&self) -> &Subscription {
        &self.inner.subscription
    }

    /// Whether further events would be dropped
    pub fn is_closed(&self) -> bool {
        self.inner.subscription.is_disposed() || lock(&self.inner.serial).done
    }

    pub fn next(&self, value: T) {
        self.emit(Event::Next(value));
    }

    /// Deliver a terminal error; cancellation errors are dropped silently
    pub fn error(&self, error: StreamError) {
        self.emit(Event::Error(error));
    }

    pub fn complete(&self) {
        self.emit(Event::Complete);
    }

    /// Deliver one event, serialized against all other emitters
    pub fn emit(&self, event: Event<T>) {
        if self.enqueue(event) {
            self.drain();
        }
    }

    /// Queue an event without draining; returns whether draining is needed
    pub(crate) fn enqueue(&self, event: Event<T>) -> bool {
        if self.inner.subscription.is_disposed() {
            return false;
        }
        if let Event::Error(error) = &event {
            if error.is_cancellation() {
                trace!(subscription = %self.inner.subscription.id(), "cancellation dropped");
                return false;
            }
        }
        let mut serial = lock(&self.inner.serial);
        if serial.done {
            return false;
        }
        if event.is_terminal() {
            serial.done = true;
        }
        serial.queue.push_back(event);
        !serial.emitting
    }

    /// Deliver queued events unless another caller is already doing so
    pub(crate) fn drain(&self) {
        {
            let mut serial = lock(&self.inner.serial);
            if serial.emitting {
                return;
            }
            serial.emitting = true;
        }
        let _unwind = EmittingReset {
            serial: &self.inner.serial,
        };
        loop {
            let event = {
                let mut serial = lock(&self.inner.serial);
                match serial.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        serial.emitting = false;
                        return;
                    }
                }
            };
            self.deliver(event);
        }
    }

    fn deliver(&self, event: Event<T>) {
        if self.inner.subscription.is_disposed() {
            return;
        }
        match event {
            Event::Next(value) => {
                if let Some(observer) = lock(&self.inner.observer).as_mut() {
                    observer.on_next(value);
                }
            }
            Event::Error(error) => {
                let observer = lock(&self.inner.observer).take();
                if let Some(mut observer) = observer {
                    observer.on_error(error);
                }
                self.inner.subscription.dispose();
            }
            Event::Complete => {
                let observer = lock(&self.inner.observer).take();
                if let Some(mut observer) = observer {
                    observer.on_complete();
                }
                self.inner.subscription.dispose();
            }
        }
    }
}

/// Releases the emitter slot when an observer callback panics mid-drain
struct EmittingReset<'a, T> {
    serial: &'a Mutex<Emission<T>>,
}

impl<T> Drop for EmittingReset<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock(self.serial).emitting = false;
        }
    }
}

impl<T: Send + 'static> Observer<T> for Subscriber<T> {
    fn on_next(&mut self, value: T) {
        self.next(value);
    }

    fn on_error(&mut self, error: StreamError) {
        self.error(error);
    }

    fn on_complete(&mut self) {
        self.complete();
    }
}
