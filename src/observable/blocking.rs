// Copyright (c) 2025 - Cowboy AI, Inc.
//! Blocking bridges out of the push world.
//!
//! These block the calling thread until the source delivers. Never call
//! them from a worker the source itself emits on, or from inside an async
//! task: the source can then never make progress.
//!
//! | Bridge | Pull yields |
//! |--------|-------------|
//! | `blocking_collect()` | every value at once, after completion |
//! | `blocking_last()` | the final value, after completion |
//! | `blocking_iter()` | every value in order; nothing is missed |
//! | `blocking_latest()` | the newest value not yet seen, waiting if none |
//! | `most_recent(v)` | the newest value without waiting, repeats allowed |

use super::Observable;
use crate::errors::{StreamError, StreamResult};
use crate::event::{Event, Terminal};
use crate::observer::Observer;
use crate::subscription::Subscription;
use crate::sync::lock;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};

struct ChannelSink<T> {
    sender: Sender<Event<T>>,
}

impl<T: Send + 'static> Observer<T> for ChannelSink<T> {
    fn on_next(&mut self, value: T) {
        // receiver gone means the iterator was dropped; disposal follows
        let _ = self.sender.send(Event::Next(value));
    }

    fn on_error(&mut self, error: StreamError) {
        let _ = self.sender.send(Event::Error(error));
    }

    fn on_complete(&mut self) {
        let _ = self.sender.send(Event::Complete);
    }
}

/// Iterator over every value of a source, in order
///
/// Values are cached in an unbounded channel until pulled. Dropping the
/// iterator disposes the subscription.
pub struct BlockingIter<T> {
    receiver: Receiver<Event<T>>,
    subscription: Subscription,
    done: bool,
}

impl<T> Iterator for BlockingIter<T> {
    type Item = StreamResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.receiver.recv() {
            Ok(Event::Next(value)) => Some(Ok(value)),
            Ok(Event::Error(error)) => {
                self.done = true;
                Some(Err(error))
            }
            Ok(Event::Complete) | Err(_) => {
                self.done = true;
                None
            }
        }
    }
}

impl<T> Drop for BlockingIter<T> {
    fn drop(&mut self) {
        self.subscription.dispose();
    }
}

/// Slot shared between a source and a sampling iterator
struct Slot<T> {
    state: Mutex<SlotState<T>>,
    changed: Condvar,
}

struct SlotState<T> {
    value: Option<T>,
    terminal: Option<Terminal>,
}

impl<T> Slot<T> {
    fn new(value: Option<T>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState {
                value,
                terminal: None,
            }),
            changed: Condvar::new(),
        })
    }
}

struct SlotSink<T> {
    slot: Arc<Slot<T>>,
}

impl<T> SlotSink<T> {
    fn terminate(&self, terminal: Terminal) {
        lock(&self.slot.state).terminal = Some(terminal);
        self.slot.changed.notify_all();
    }
}

impl<T: Send + 'static> Observer<T> for SlotSink<T> {
    fn on_next(&mut self, value: T) {
        lock(&self.slot.state).value = Some(value);
        self.slot.changed.notify_all();
    }

    fn on_error(&mut self, error: StreamError) {
        self.terminate(Terminal::Error(error));
    }

    fn on_complete(&mut self) {
        self.terminate(Terminal::Complete);
    }
}

/// Take a pending terminal, turning an error into one final item
fn finish<T>(state: &mut SlotState<T>) -> Option<StreamResult<T>> {
    match state.terminal.replace(Terminal::Complete) {
        Some(Terminal::Error(error)) => Some(Err(error)),
        _ => None,
    }
}

/// Iterator yielding the newest value not yet returned
///
/// Blocks while no unseen value is available. Values overwritten before
/// being pulled are skipped; a value is never returned twice.
pub struct BlockingLatest<T> {
    slot: Arc<Slot<T>>,
    subscription: Subscription,
}

impl<T> Iterator for BlockingLatest<T> {
    type Item = StreamResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut state = lock(&self.slot.state);
        loop {
            if let Some(value) = state.value.take() {
                return Some(Ok(value));
            }
            if state.terminal.is_some() {
                return finish(&mut state);
            }
            state = self
                .slot
                .changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

impl<T> Drop for BlockingLatest<T> {
    fn drop(&mut self) {
        self.subscription.dispose();
    }
}

/// Iterator yielding the current value on every pull, without waiting
pub struct MostRecent<T> {
    slot: Arc<Slot<T>>,
    subscription: Subscription,
}

impl<T: Clone> Iterator for MostRecent<T> {
    type Item = StreamResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut state = lock(&self.slot.state);
        if state.terminal.is_some() {
            return finish(&mut state);
        }
        state.value.clone().map(Ok)
    }
}

impl<T> Drop for MostRecent<T> {
    fn drop(&mut self) {
        self.subscription.dispose();
    }
}

impl<T: Send + 'static> Observable<T> {
    /// Block until completion and return every value
    ///
    /// # Errors
    ///
    /// The error that terminated the source.
    pub fn blocking_collect(&self) -> StreamResult<Vec<T>> {
        self.blocking_iter().collect()
    }

    /// Block until completion and return the last value, if any
    ///
    /// # Errors
    ///
    /// The error that terminated the source.
    pub fn blocking_last(&self) -> StreamResult<Option<T>> {
        let mut last = None;
        for value in self.blocking_iter() {
            last = Some(value?);
        }
        Ok(last)
    }

    /// Iterate over every value, blocking for each
    pub fn blocking_iter(&self) -> BlockingIter<T> {
        let (sender, receiver) = channel();
        let subscription = self.subscribe(ChannelSink { sender });
        BlockingIter {
            receiver,
            subscription,
            done: false,
        }
    }

    /// Iterate over the newest unseen value, blocking until one arrives
    pub fn blocking_latest(&self) -> BlockingLatest<T> {
        let slot = Slot::new(None);
        let subscription = self.subscribe(SlotSink { slot: slot.clone() });
        BlockingLatest { slot, subscription }
    }

    /// Iterate over the current value, `initial` until the source emits
    ///
    /// Never blocks. Ends when the source completes.
    pub fn most_recent(&self, initial: T) -> MostRecent<T>
    where
        T: Clone,
    {
        let slot = Slot::new(Some(initial));
        let subscription = self.subscribe(SlotSink { slot: slot.clone() });
        MostRecent { slot, subscription }
    }
}
