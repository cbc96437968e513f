// Copyright (c) 2025 - Cowboy AI, Inc.
//! Connectable Sources
//!
//! A [`ConnectableObservable`] turns a cold source hot. Subscribers attach to
//! an internal [`Subject`]; nothing flows until [`ConnectableObservable::connect`]
//! subscribes that subject to the source, once, on behalf of everyone.
//!
//! ```text
//!            connect()
//!   source ────────────▶ Subject ──┬──▶ subscriber A
//!                                  ├──▶ subscriber B
//!                                  └──▶ subscriber C
//! ```
//!
//! Disposing the connection disconnects the source. Connecting again after a
//! disconnect or a terminal event starts over with a fresh subject, so the
//! source runs from the beginning for whoever subscribes next.
//!
//! | Helper | Connects | Disconnects |
//! |--------|----------|-------------|
//! | `ref_count()` | first subscriber | last subscriber leaves |
//! | `auto_connect(n)` | n-th subscriber | never |
//! | `share()` | `publish().ref_count()` | |
//! | `cache()` | `replay(None).auto_connect(1)` | |

use super::Subject;
use crate::observable::Observable;
use crate::subscription::{Subscriber, Subscription};
use crate::sync::lock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

type SubjectFactory<T> = Box<dyn Fn() -> Subject<T> + Send + Sync>;

/// A hot source that starts on `connect`
pub struct ConnectableObservable<T> {
    inner: Arc<ConnectInner<T>>,
}

struct ConnectInner<T> {
    source: Observable<T>,
    factory: SubjectFactory<T>,
    /// Whether late subscribers may still read a terminated subject
    retain_terminated: bool,
    state: Mutex<ConnectState<T>>,
}

struct ConnectState<T> {
    subject: Subject<T>,
    connection: Option<Subscription>,
}

impl<T> Clone for ConnectableObservable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> ConnectableObservable<T> {
    fn new<F>(source: Observable<T>, factory: F, retain_terminated: bool) -> Self
    where
        F: Fn() -> Subject<T> + Send + Sync + 'static,
    {
        let subject = factory();
        Self {
            inner: Arc::new(ConnectInner {
                source,
                factory: Box::new(factory),
                retain_terminated,
                state: Mutex::new(ConnectState {
                    subject,
                    connection: None,
                }),
            }),
        }
    }

    /// Subject new subscribers attach to
    fn current_subject(&self) -> Subject<T> {
        let mut state = lock(&self.inner.state);
        let finished = state
            .connection
            .as_ref()
            .map_or(false, Subscription::is_disposed);
        let retained = self.inner.retain_terminated && state.subject.is_terminated();
        if finished && !retained {
            state.subject = (self.inner.factory)();
            state.connection = None;
        }
        state.subject.clone()
    }

    /// The subscribe side; events flow once connected
    pub fn observable(&self) -> Observable<T> {
        let connectable = self.clone();
        Observable::create(move |subscriber| {
            connectable
                .current_subject()
                .as_observable()
                .subscribe_with(subscriber)
        })
    }

    /// Subscribe the shared subject to the source
    ///
    /// Idempotent while connected: returns the live connection.
    ///
    /// # Returns
    ///
    /// The connection; dispose it to disconnect from the source.
    pub fn connect(&self) -> Subscription {
        let (subject, connection) = {
            let mut state = lock(&self.inner.state);
            if let Some(connection) = &state.connection {
                if !connection.is_disposed() {
                    return connection.clone();
                }
                state.subject = (self.inner.factory)();
            }
            let connection = Subscription::new();
            state.connection = Some(connection.clone());
            (state.subject.clone(), connection)
        };
        let id = connection.id();
        debug!(connection = %id, "connectable source connected");
        connection.add_teardown(move || debug!(connection = %id, "connectable source disconnected"));
        self.inner
            .source
            .subscribe_with(Subscriber::with_subscription(subject, connection.clone()));
        connection
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner.state)
            .connection
            .as_ref()
            .map_or(false, |connection| !connection.is_disposed())
    }

    /// Connect on the first subscriber, disconnect when the last one leaves
    pub fn ref_count(self) -> Observable<T> {
        let counter = Arc::new(Mutex::new(RefCount::default()));
        Observable::create(move |subscriber: Subscriber<T>| {
            let subscription = subscriber.subscription().clone();
            self.observable().subscribe_with(subscriber);
            if subscription.is_disposed() {
                return;
            }

            let first = {
                let mut count = lock(&counter);
                count.subscribers += 1;
                count.subscribers == 1
            };
            let leaving = counter.clone();
            subscription.add_teardown(move || {
                let connection = {
                    let mut count = lock(&leaving);
                    count.subscribers = count.subscribers.saturating_sub(1);
                    if count.subscribers == 0 {
                        count.connection.take()
                    } else {
                        None
                    }
                };
                if let Some(connection) = connection {
                    debug!("last subscriber left; disconnecting");
                    connection.dispose();
                }
            });

            if first {
                let connection = self.connect();
                let mut count = lock(&counter);
                if count.subscribers == 0 {
                    drop(count);
                    connection.dispose();
                } else {
                    count.connection = Some(connection);
                }
            }
        })
    }

    /// Connect once `subscribers` have subscribed; `0` connects immediately
    pub fn auto_connect(self, subscribers: usize) -> Observable<T> {
        if subscribers == 0 {
            self.connect();
        }
        let seen = Arc::new(AtomicUsize::new(0));
        Observable::create(move |subscriber| {
            self.observable().subscribe_with(subscriber);
            if seen.fetch_add(1, Ordering::AcqRel) + 1 == subscribers {
                self.connect();
            }
        })
    }
}

#[derive(Default)]
struct RefCount {
    subscribers: usize,
    connection: Option<Subscription>,
}

impl<T: Clone + Send + 'static> Observable<T> {
    /// Share one subscription among all subscribers, starting on `connect`
    pub fn publish(self) -> ConnectableObservable<T> {
        ConnectableObservable::new(self, Subject::publish, false)
    }

    /// Like [`Observable::publish`] but replaying the last `capacity` values
    /// (all when `None`) to late subscribers
    pub fn replay(self, capacity: Option<usize>) -> ConnectableObservable<T> {
        ConnectableObservable::new(self, move || Subject::replay(capacity), true)
    }

    /// `publish().ref_count()`
    pub fn share(self) -> Observable<T> {
        self.publish().ref_count()
    }

    /// Subscribe once on first use and replay everything to everyone
    pub fn cache(self) -> Observable<T> {
        self.replay(None).auto_connect(1)
    }
}
