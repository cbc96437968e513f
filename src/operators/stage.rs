// Copyright (c) 2025 - Cowboy AI, Inc.
//! Operator Stages
//!
//! A [`Stage`] is a per-subscription state machine turning one upstream
//! event into zero or more downstream events:
//!
//! ```text
//! process : Event<In> -> [Event<Out>]
//! ```
//!
//! [`Observable::lift`] builds a fresh stage for every subscriber, so stage
//! state (accumulators, counters, partial groups) is never shared between
//! subscriptions. Stages only see events in order and one at a time; the
//! surrounding [`Subscriber`] provides the serialization.

use crate::errors::StreamError;
use crate::event::Event;
use crate::observable::Observable;
use crate::observer::Observer;
use crate::subscription::Subscriber;
use std::collections::VecDeque;
use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;

/// Per-subscription transformation state machine
pub trait Stage<In, Out>: Send + 'static {
    /// Handle one upstream event, returning what to emit downstream
    ///
    /// Emitting a terminal ends the subscription; anything after it is
    /// ignored.
    fn process(&mut self, event: Event<In>) -> Vec<Event<Out>>;
}

/// Adapts a closure into a [`Stage`]
pub struct FnStage<F> {
    f: F,
}

impl<F> FnStage<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<In, Out, F> Stage<In, Out> for FnStage<F>
where
    F: FnMut(Event<In>) -> Vec<Event<Out>> + Send + 'static,
{
    fn process(&mut self, event: Event<In>) -> Vec<Event<Out>> {
        (self.f)(event)
    }
}

struct StageObserver<S, U, T> {
    stage: S,
    downstream: Subscriber<U>,
    _input: PhantomData<fn(T)>,
}

impl<S, U, T> StageObserver<S, U, T>
where
    T: Send + 'static,
    U: Send + 'static,
    S: Stage<T, U>,
{
    fn push(&mut self, event: Event<T>) {
        for out in self.stage.process(event) {
            if self.downstream.is_closed() {
                return;
            }
            self.downstream.emit(out);
        }
    }
}

impl<S, U, T> Observer<T> for StageObserver<S, U, T>
where
    T: Send + 'static,
    U: Send + 'static,
    S: Stage<T, U>,
{
    fn on_next(&mut self, value: T) {
        self.push(Event::Next(value));
    }

    fn on_error(&mut self, error: StreamError) {
        self.push(Event::Error(error));
    }

    fn on_complete(&mut self) {
        self.push(Event::Complete);
    }
}

impl<T: Send + 'static> Observable<T> {
    /// Run every event through a stage built by `factory`
    ///
    /// `factory` runs once per subscription.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// // emit each value twice
    /// let doubled = source.lift(|| FnStage::new(|event: Event<i32>| match event {
    ///     Event::Next(v) => vec![Event::Next(v), Event::Next(v)],
    ///     other => vec![other],
    /// }));
    /// ```
    pub fn lift<U, S, F>(self, factory: F) -> Observable<U>
    where
        U: Send + 'static,
        S: Stage<T, U>,
        F: Fn() -> S + Send + Sync + 'static,
    {
        Observable::create(move |downstream: Subscriber<U>| {
            let parent = downstream.subscription().clone();
            self.subscribe_with(Subscriber::linked(
                &parent,
                StageObserver {
                    stage: factory(),
                    downstream,
                    _input: PhantomData,
                },
            ));
        })
    }
}

pub(crate) struct MapStage<F> {
    f: Arc<F>,
}

impl<F> MapStage<F> {
    pub(crate) fn new(f: Arc<F>) -> Self {
        Self { f }
    }
}

impl<T, U, F> Stage<T, U> for MapStage<F>
where
    T: 'static,
    U: 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    fn process(&mut self, event: Event<T>) -> Vec<Event<U>> {
        vec![event.map(|value| (self.f)(value))]
    }
}

pub(crate) struct TryMapStage<F, E> {
    f: Arc<F>,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> TryMapStage<F, E> {
    pub(crate) fn new(f: Arc<F>) -> Self {
        Self {
            f,
            _error: PhantomData,
        }
    }
}

impl<T, U, E, F> Stage<T, U> for TryMapStage<F, E>
where
    T: 'static,
    U: 'static,
    E: Display + 'static,
    F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
{
    fn process(&mut self, event: Event<T>) -> Vec<Event<U>> {
        match event {
            Event::Next(value) => match (self.f)(value) {
                Ok(mapped) => vec![Event::Next(mapped)],
                Err(err) => vec![Event::Error(StreamError::transform(err))],
            },
            Event::Error(error) => vec![Event::Error(error)],
            Event::Complete => vec![Event::Complete],
        }
    }
}

pub(crate) struct FilterStage<P> {
    predicate: Arc<P>,
}

impl<P> FilterStage<P> {
    pub(crate) fn new(predicate: Arc<P>) -> Self {
        Self { predicate }
    }
}

impl<T, P> Stage<T, T> for FilterStage<P>
where
    T: 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn process(&mut self, event: Event<T>) -> Vec<Event<T>> {
        match event {
            Event::Next(value) if !(self.predicate)(&value) => Vec::new(),
            other => vec![other],
        }
    }
}

/// Running accumulator, emitted after every value
pub(crate) struct ScanStage<A, F> {
    acc: A,
    f: Arc<F>,
}

impl<A, F> ScanStage<A, F> {
    pub(crate) fn new(seed: A, f: Arc<F>) -> Self {
        Self { acc: seed, f }
    }
}

impl<T, A, F> Stage<T, A> for ScanStage<A, F>
where
    T: 'static,
    A: Clone + Send + 'static,
    F: Fn(A, T) -> A + Send + Sync + 'static,
{
    fn process(&mut self, event: Event<T>) -> Vec<Event<A>> {
        match event {
            Event::Next(value) => {
                let acc = (self.f)(self.acc.clone(), value);
                self.acc = acc.clone();
                vec![Event::Next(acc)]
            }
            Event::Error(error) => vec![Event::Error(error)],
            Event::Complete => vec![Event::Complete],
        }
    }
}

/// Accumulator emitted once, on completion
pub(crate) struct ReduceStage<A, F> {
    acc: Option<A>,
    f: Arc<F>,
}

impl<A, F> ReduceStage<A, F> {
    pub(crate) fn new(seed: A, f: Arc<F>) -> Self {
        Self { acc: Some(seed), f }
    }
}

impl<T, A, F> Stage<T, A> for ReduceStage<A, F>
where
    T: 'static,
    A: Send + 'static,
    F: Fn(A, T) -> A + Send + Sync + 'static,
{
    fn process(&mut self, event: Event<T>) -> Vec<Event<A>> {
        match event {
            Event::Next(value) => {
                self.acc = self.acc.take().map(|acc| (self.f)(acc, value));
                Vec::new()
            }
            Event::Error(error) => vec![Event::Error(error)],
            Event::Complete => finish(self.acc.take()),
        }
    }
}

/// Seedless reduction; an empty upstream completes without a value
pub(crate) struct ReduceWithStage<T, F> {
    acc: Option<T>,
    f: Arc<F>,
}

impl<T, F> ReduceWithStage<T, F> {
    pub(crate) fn new(f: Arc<F>) -> Self {
        Self { acc: None, f }
    }
}

impl<T, F> Stage<T, T> for ReduceWithStage<T, F>
where
    T: Send + 'static,
    F: Fn(T, T) -> T + Send + Sync + 'static,
{
    fn process(&mut self, event: Event<T>) -> Vec<Event<T>> {
        match event {
            Event::Next(value) => {
                self.acc = Some(match self.acc.take() {
                    Some(acc) => (self.f)(acc, value),
                    None => value,
                });
                Vec::new()
            }
            Event::Error(error) => vec![Event::Error(error)],
            Event::Complete => finish(self.acc.take()),
        }
    }
}

fn finish<A>(acc: Option<A>) -> Vec<Event<A>> {
    acc.map(Event::Next)
        .into_iter()
        .chain(std::iter::once(Event::Complete))
        .collect()
}

/// Count-based groups, optionally overlapping or gapped
pub(crate) struct ChunkStage<T> {
    size: usize,
    skip: usize,
    index: usize,
    open: VecDeque<Vec<T>>,
}

impl<T> ChunkStage<T> {
    pub(crate) fn new(size: usize, skip: usize) -> Self {
        Self {
            size,
            skip,
            index: 0,
            open: VecDeque::new(),
        }
    }
}

impl<T: Clone + Send + 'static> Stage<T, Vec<T>> for ChunkStage<T> {
    fn process(&mut self, event: Event<T>) -> Vec<Event<Vec<T>>> {
        match event {
            Event::Next(value) => {
                if self.index % self.skip == 0 {
                    self.open.push_back(Vec::with_capacity(self.size));
                }
                self.index += 1;
                for group in self.open.iter_mut() {
                    group.push(value.clone());
                }
                let mut out = Vec::new();
                while self.open.front().map_or(false, |group| group.len() >= self.size) {
                    if let Some(group) = self.open.pop_front() {
                        out.push(Event::Next(group));
                    }
                }
                out
            }
            Event::Error(error) => {
                self.open.clear();
                vec![Event::Error(error)]
            }
            Event::Complete => self
                .open
                .drain(..)
                .filter(|group| !group.is_empty())
                .map(Event::Next)
                .chain(std::iter::once(Event::Complete))
                .collect(),
        }
    }
}

pub(crate) struct TakeStage {
    remaining: u64,
}

impl TakeStage {
    pub(crate) fn new(count: u64) -> Self {
        Self { remaining: count }
    }
}

impl<T: 'static> Stage<T, T> for TakeStage {
    fn process(&mut self, event: Event<T>) -> Vec<Event<T>> {
        match event {
            Event::Next(value) => {
                if self.remaining == 0 {
                    return Vec::new();
                }
                self.remaining -= 1;
                if self.remaining == 0 {
                    vec![Event::Next(value), Event::Complete]
                } else {
                    vec![Event::Next(value)]
                }
            }
            terminal => vec![terminal],
        }
    }
}

pub(crate) struct SkipStage {
    remaining: u64,
}

impl SkipStage {
    pub(crate) fn new(count: u64) -> Self {
        Self { remaining: count }
    }
}

impl<T: 'static> Stage<T, T> for SkipStage {
    fn process(&mut self, event: Event<T>) -> Vec<Event<T>> {
        match event {
            Event::Next(_) if self.remaining > 0 => {
                self.remaining -= 1;
                Vec::new()
            }
            other => vec![other],
        }
    }
}

pub(crate) struct TakeLastStage<T> {
    count: usize,
    tail: VecDeque<T>,
}

impl<T> TakeLastStage<T> {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            count,
            tail: VecDeque::new(),
        }
    }
}

impl<T: Send + 'static> Stage<T, T> for TakeLastStage<T> {
    fn process(&mut self, event: Event<T>) -> Vec<Event<T>> {
        match event {
            Event::Next(value) => {
                if self.count > 0 {
                    if self.tail.len() == self.count {
                        self.tail.pop_front();
                    }
                    self.tail.push_back(value);
                }
                Vec::new()
            }
            Event::Error(error) => vec![Event::Error(error)],
            Event::Complete => self
                .tail
                .drain(..)
                .map(Event::Next)
                .chain(std::iter::once(Event::Complete))
                .collect(),
        }
    }
}

pub(crate) struct DistinctUntilChangedStage<T> {
    last: Option<T>,
}

impl<T> DistinctUntilChangedStage<T> {
    pub(crate) fn new() -> Self {
        Self { last: None }
    }
}

impl<T: Clone + PartialEq + Send + 'static> Stage<T, T> for DistinctUntilChangedStage<T> {
    fn process(&mut self, event: Event<T>) -> Vec<Event<T>> {
        match event {
            Event::Next(value) => {
                if self.last.as_ref() == Some(&value) {
                    return Vec::new();
                }
                self.last = Some(value.clone());
                vec![Event::Next(value)]
            }
            terminal => vec![terminal],
        }
    }
}

/// Holds the only value until completion; a second value is an error
pub(crate) struct SingleStage<T> {
    held: Option<T>,
    required: bool,
    failed: bool,
}

impl<T> SingleStage<T> {
    pub(crate) fn new(required: bool) -> Self {
        Self {
            held: None,
            required,
            failed: false,
        }
    }
}

impl<T: Send + 'static> Stage<T, T> for SingleStage<T> {
    fn process(&mut self, event: Event<T>) -> Vec<Event<T>> {
        if self.failed {
            return Vec::new();
        }
        match event {
            Event::Next(value) => {
                if self.held.replace(value).is_none() {
                    return Vec::new();
                }
                self.failed = true;
                vec![Event::Error(StreamError::ElementCount(
                    "expected at most one value, got more".to_string(),
                ))]
            }
            Event::Error(error) => vec![Event::Error(error)],
            Event::Complete => match self.held.take() {
                Some(value) => vec![Event::Next(value), Event::Complete],
                None if self.required => vec![Event::Error(StreamError::ElementCount(
                    "expected exactly one value, the stream was empty".to_string(),
                ))],
                None => vec![Event::Complete],
            },
        }
    }
}

/// Short-circuiting quantifier: `all` when `expect` is true, `any` otherwise
pub(crate) struct QuantifierStage<P> {
    predicate: Arc<P>,
    expect: bool,
}

impl<P> QuantifierStage<P> {
    pub(crate) fn all(predicate: Arc<P>) -> Self {
        Self {
            predicate,
            expect: true,
        }
    }

    pub(crate) fn any(predicate: Arc<P>) -> Self {
        Self {
            predicate,
            expect: false,
        }
    }
}

impl<T, P> Stage<T, bool> for QuantifierStage<P>
where
    T: 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn process(&mut self, event: Event<T>) -> Vec<Event<bool>> {
        match event {
            Event::Next(value) => {
                if (self.predicate)(&value) == self.expect {
                    Vec::new()
                } else {
                    vec![Event::Next(!self.expect), Event::Complete]
                }
            }
            Event::Error(error) => vec![Event::Error(error)],
            Event::Complete => vec![Event::Next(self.expect), Event::Complete],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run<T, U, S: Stage<T, U>>(mut stage: S, input: Vec<Event<T>>) -> Vec<Event<U>> {
        input.into_iter().flat_map(|e| stage.process(e)).collect()
    }

    fn nexts<T>(values: impl IntoIterator<Item = T>) -> Vec<Event<T>> {
        values
            .into_iter()
            .map(Event::Next)
            .chain(std::iter::once(Event::Complete))
            .collect()
    }

    #[test]
    fn test_chunk_overlapping_groups() {
        let out = run(ChunkStage::new(3, 1), nexts(1..=5));
        assert_eq!(
            out,
            vec![
                Event::Next(vec![1, 2, 3]),
                Event::Next(vec![2, 3, 4]),
                Event::Next(vec![3, 4, 5]),
                Event::Next(vec![4, 5]),
                Event::Next(vec![5]),
                Event::Complete,
            ]
        );
    }

    #[test]
    fn test_chunk_gapped_groups() {
        let out = run(ChunkStage::new(2, 3), nexts(1..=8));
        assert_eq!(
            out,
            vec![
                Event::Next(vec![1, 2]),
                Event::Next(vec![4, 5]),
                Event::Next(vec![7, 8]),
                Event::Complete,
            ]
        );
    }

    #[test]
    fn test_chunk_discards_partial_on_error() {
        let out = run(
            ChunkStage::new(3, 3),
            vec![
                Event::Next(1),
                Event::Error(StreamError::source("x")),
            ],
        );
        assert_eq!(out, vec![Event::Error(StreamError::source("x"))]);
    }

    #[test]
    fn test_reduce_without_seed_on_empty() {
        let f = Arc::new(|a: i32, b: i32| a + b);
        let out = run(ReduceWithStage::new(f), nexts(Vec::<i32>::new()));
        assert_eq!(out, vec![Event::Complete]);
    }

    #[test]
    fn test_take_last_keeps_tail() {
        let out = run(TakeLastStage::new(2), nexts(1..=5));
        assert_eq!(out, vec![Event::Next(4), Event::Next(5), Event::Complete]);
    }

    #[test]
    fn test_single_rejects_second_value() {
        let out = run(SingleStage::new(false), nexts(1..=3));
        assert_eq!(
            out,
            vec![Event::Error(StreamError::ElementCount(
                "expected at most one value, got more".to_string()
            ))]
        );

        let lone = run(SingleStage::new(true), nexts(Some(7)));
        assert_eq!(lone, vec![Event::Next(7), Event::Complete]);
    }

    #[test]
    fn test_quantifier_short_circuits() {
        let any = run(QuantifierStage::any(Arc::new(|v: &i32| *v == 2)), nexts(1..=5));
        assert_eq!(any, vec![Event::Next(true), Event::Complete]);

        let all = run(QuantifierStage::all(Arc::new(|v: &i32| *v < 10)), nexts(1..=5));
        assert_eq!(all, vec![Event::Next(true), Event::Complete]);
    }

    #[test]
    fn test_lift_builds_stage_per_subscriber() {
        let source = Observable::from_iter(vec![1, 2, 3]).lift(|| {
            let mut seen = 0;
            FnStage::new(move |event: Event<i32>| match event {
                Event::Next(v) => {
                    seen += 1;
                    vec![Event::Next(v * 10 + seen)]
                }
                other => vec![other.map(|_| 0)],
            })
        });
        source.test().assert_values(&[11, 22, 33]);
        source.test().assert_values(&[11, 22, 33]);
    }
}
