// Copyright (c) 2025 - Cowboy AI, Inc.
//! Subjects
//!
//! A [`Subject`] is both an [`Observer`] and a source: every event pushed
//! into it is multicast to the observers subscribed at that moment. Three
//! flavours differ only in what a late subscriber gets first:
//!
//! | Flavour | Late subscriber receives first |
//! |---------|--------------------------------|
//! | `publish()` | nothing |
//! | `behavior(initial)` | the current value |
//! | `replay(capacity)` | the last `capacity` values (all when `None`) |
//!
//! After a terminal event a publish or behavior subject hands late
//! subscribers only the terminal; a replay subject replays its buffer first.

use crate::errors::StreamError;
use crate::event::{Event, Terminal};
use crate::observable::Observable;
use crate::observer::Observer;
use crate::subscription::Subscriber;
use crate::sync::lock;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use tracing::trace;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Publish,
    Behavior,
    Replay(Option<usize>),
}

/// Multicasting observer/source pair
pub struct Subject<T> {
    inner: Arc<SubjectInner<T>>,
}

struct SubjectInner<T> {
    kind: Kind,
    state: Mutex<SubjectState<T>>,
}

struct SubjectState<T> {
    observers: Vec<(Uuid, Subscriber<T>)>,
    buffer: VecDeque<T>,
    terminal: Option<Terminal>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Subject<T> {
    fn build(kind: Kind, buffer: VecDeque<T>) -> Self {
        Self {
            inner: Arc::new(SubjectInner {
                kind,
                state: Mutex::new(SubjectState {
                    observers: Vec::new(),
                    buffer,
                    terminal: None,
                }),
            }),
        }
    }

    /// Forward events only to current subscribers
    pub fn publish() -> Self {
        Self::build(Kind::Publish, VecDeque::new())
    }

    /// Start each subscriber with the most recent value, initially `initial`
    pub fn behavior(initial: T) -> Self {
        Self::build(Kind::Behavior, VecDeque::from([initial]))
    }

    /// Replay the last `capacity` values to each subscriber, all of them when
    /// `capacity` is `None`
    pub fn replay(capacity: Option<usize>) -> Self {
        Self::build(Kind::Replay(capacity), VecDeque::new())
    }

    /// Current value of a behavior subject
    pub fn value(&self) -> Option<T> {
        match self.inner.kind {
            Kind::Behavior => lock(&self.inner.state).buffer.back().cloned(),
            _ => None,
        }
    }

    pub fn on_next(&self, value: T) {
        let observers = {
            let mut state = lock(&self.inner.state);
            if state.terminal.is_some() {
                return;
            }
            match self.inner.kind {
                Kind::Publish => {}
                Kind::Behavior => {
                    state.buffer.clear();
                    state.buffer.push_back(value.clone());
                }
                Kind::Replay(capacity) => {
                    if capacity != Some(0) {
                        state.buffer.push_back(value.clone());
                    }
                    if let Some(capacity) = capacity {
                        while state.buffer.len() > capacity {
                            state.buffer.pop_front();
                        }
                    }
                }
            }
            state
                .observers
                .iter()
                .map(|(_, subscriber)| subscriber.clone())
                .collect::<Vec<_>>()
        };
        for subscriber in observers {
            subscriber.next(value.clone());
        }
    }

    pub fn on_error(&self, error: StreamError) {
        self.terminate(Terminal::Error(error));
    }

    pub fn on_complete(&self) {
        self.terminate(Terminal::Complete);
    }

    fn terminate(&self, terminal: Terminal) {
        let observers = {
            let mut state = lock(&self.inner.state);
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(terminal.clone());
            if self.inner.kind == Kind::Behavior {
                state.buffer.clear();
            }
            std::mem::take(&mut state.observers)
        };
        for (_, subscriber) in observers {
            subscriber.emit(terminal.clone().into_event());
        }
    }

    /// Whether a terminal event has been received
    pub fn is_terminated(&self) -> bool {
        lock(&self.inner.state).terminal.is_some()
    }

    pub fn has_observers(&self) -> bool {
        self.observer_count() > 0
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.inner.state).observers.len()
    }

    /// The subscribe side only, hiding the ability to push events
    pub fn as_observable(&self) -> Observable<T> {
        let subject = self.clone();
        Observable::create(move |subscriber| subject.add(subscriber))
    }

    fn add(&self, subscriber: Subscriber<T>) {
        let id = subscriber.subscription().id();
        {
            let mut state = lock(&self.inner.state);
            // primed under the lock so a concurrent on_next queues behind it
            if self.inner.kind != Kind::Publish {
                for value in state.buffer.iter() {
                    subscriber.enqueue(Event::Next(value.clone()));
                }
            }
            if let Some(terminal) = state.terminal.clone() {
                subscriber.enqueue(terminal.into_event());
                drop(state);
                subscriber.drain();
                return;
            }
            state.observers.push((id, subscriber.clone()));
        }
        let weak: Weak<SubjectInner<T>> = Arc::downgrade(&self.inner);
        subscriber.subscription().add_teardown(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner.state).observers.retain(|(observer, _)| *observer != id);
                trace!(subscription = %id, "subject observer removed");
            }
        });
        subscriber.drain();
    }
}

impl<T: Clone + Send + 'static> Observer<T> for Subject<T> {
    fn on_next(&mut self, value: T) {
        Subject::on_next(self, value);
    }

    fn on_error(&mut self, error: StreamError) {
        Subject::on_error(self, error);
    }

    fn on_complete(&mut self) {
        Subject::on_complete(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_publish_only_forwards_to_current_subscribers() {
        let subject = Subject::publish();
        let early = subject.as_observable().test();
        subject.on_next(1);
        let late = subject.as_observable().test();
        subject.on_next(2);
        subject.on_complete();

        early.assert_values(&[1, 2]).assert_complete();
        late.assert_values(&[2]).assert_complete();
        subject.as_observable().test().assert_value_count(0).assert_complete();
    }

    #[test]
    fn test_behavior_starts_with_current_value() {
        let subject = Subject::behavior(0);
        let first = subject.as_observable().test();
        subject.on_next(1);
        let second = subject.as_observable().test();
        subject.on_next(2);

        first.assert_values(&[0, 1, 2]);
        second.assert_values(&[1, 2]);
        assert_eq!(subject.value(), Some(2));

        subject.on_error(StreamError::source("done"));
        subject
            .as_observable()
            .test()
            .assert_failure(StreamError::source("done"), &[]);
    }

    #[test]
    fn test_bounded_replay_keeps_tail() {
        let subject = Subject::replay(Some(2));
        for i in 1..=4 {
            subject.on_next(i);
        }
        subject.as_observable().test().assert_values(&[3, 4]);

        subject.on_complete();
        subject
            .as_observable()
            .test()
            .assert_values(&[3, 4])
            .assert_complete();
    }

    #[test]
    fn test_unbounded_replay_after_completion() {
        let subject = Subject::replay(None);
        subject.on_next("a");
        subject.on_next("b");
        subject.on_complete();
        subject.on_next("c");

        subject
            .as_observable()
            .test()
            .assert_values(&["a", "b"])
            .assert_complete();
    }

    #[test]
    fn test_dispose_removes_observer() {
        let subject = Subject::<i32>::publish();
        let observer = subject.as_observable().test();
        assert_eq!(subject.observer_count(), 1);

        observer.dispose();
        assert!(!subject.has_observers());
    }
}
