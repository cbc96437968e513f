// Copyright (c) 2025 - Cowboy AI, Inc.
//! Combining several sources into one.
//!
//! - `zip` pairs values by index and stops with the shortest source
//! - `combine_latest` emits the latest value of every source whenever one
//!   of them emits, once all have emitted at least once
//! - `concat` and `start_with` run sources back to back
//! - `amb` mirrors whichever source signals first
//! - `sequence_equal` compares two sources value by value

use crate::errors::StreamError;
use crate::event::Event;
use crate::observable::Observable;
use crate::observer::Observer;
use crate::subscription::{Subscriber, Subscription};
use crate::sync::lock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

type Combine<S, R> = Arc<dyn Fn(Vec<S>) -> Option<R> + Send + Sync>;

/// Tags values of two differently typed sources so they can share a core
enum Side<A, B> {
    Left(A),
    Right(B),
}

impl<A: Clone, B: Clone> Clone for Side<A, B> {
    fn clone(&self) -> Self {
        match self {
            Side::Left(a) => Side::Left(a.clone()),
            Side::Right(b) => Side::Right(b.clone()),
        }
    }
}

fn pair<A, B, R, F>(f: Arc<F>) -> Combine<Side<A, B>, R>
where
    A: 'static,
    B: 'static,
    R: 'static,
    F: Fn(A, B) -> R + Send + Sync + 'static,
{
    Arc::new(move |row: Vec<Side<A, B>>| {
        let (mut left, mut right) = (None, None);
        for side in row {
            match side {
                Side::Left(a) => left = Some(a),
                Side::Right(b) => right = Some(b),
            }
        }
        left.zip(right).map(|(a, b)| f(a, b))
    })
}

/// Input half shared by the combining operators
trait Joiner<S>: Send + Sync + 'static {
    fn on_next(&self, index: usize, value: S);
    fn on_complete(&self, index: usize);
    fn on_error(&self, error: StreamError);
}

struct JoinInput<J> {
    joiner: Arc<J>,
    index: usize,
}

impl<S, J> Observer<S> for JoinInput<J>
where
    S: Send + 'static,
    J: Joiner<S>,
{
    fn on_next(&mut self, value: S) {
        self.joiner.on_next(self.index, value);
    }

    fn on_error(&mut self, error: StreamError) {
        self.joiner.on_error(error);
    }

    fn on_complete(&mut self) {
        self.joiner.on_complete(self.index);
    }
}

fn subscribe_all<S, J>(sources: &[Observable<S>], joiner: &Arc<J>, parent: &Subscription)
where
    S: Send + 'static,
    J: Joiner<S>,
{
    for (index, source) in sources.iter().enumerate() {
        if parent.is_disposed() {
            return;
        }
        source.subscribe_with(Subscriber::linked(
            parent,
            JoinInput {
                joiner: joiner.clone(),
                index,
            },
        ));
    }
}

struct Zip<S, R> {
    downstream: Subscriber<R>,
    combine: Combine<S, R>,
    state: Mutex<ZipState<S>>,
}

struct ZipState<S> {
    queues: Vec<VecDeque<S>>,
    done: Vec<bool>,
}

impl<S: Send + 'static, R: Send + 'static> Zip<S, R> {
    fn exhausted(state: &ZipState<S>) -> bool {
        state
            .queues
            .iter()
            .zip(&state.done)
            .any(|(queue, done)| *done && queue.is_empty())
    }
}

impl<S: Send + 'static, R: Send + 'static> Joiner<S> for Zip<S, R> {
    fn on_next(&self, index: usize, value: S) {
        {
            let mut state = lock(&self.state);
            state.queues[index].push_back(value);
            if state.queues.iter().all(|queue| !queue.is_empty()) {
                let row: Vec<S> = state
                    .queues
                    .iter_mut()
                    .filter_map(VecDeque::pop_front)
                    .collect();
                if let Some(out) = (self.combine)(row) {
                    self.downstream.enqueue(Event::Next(out));
                }
                if Self::exhausted(&state) {
                    self.downstream.enqueue(Event::Complete);
                }
            }
        }
        self.downstream.drain();
    }

    fn on_complete(&self, index: usize) {
        let finished = {
            let mut state = lock(&self.state);
            state.done[index] = true;
            state.queues[index].is_empty()
        };
        if finished {
            self.downstream.complete();
        }
    }

    fn on_error(&self, error: StreamError) {
        self.downstream.error(error);
    }
}

struct CombineLatest<S, R> {
    downstream: Subscriber<R>,
    combine: Combine<S, R>,
    state: Mutex<LatestState<S>>,
}

struct LatestState<S> {
    latest: Vec<Option<S>>,
    seen: usize,
    completed: usize,
}

impl<S, R> Joiner<S> for CombineLatest<S, R>
where
    S: Clone + Send + 'static,
    R: Send + 'static,
{
    fn on_next(&self, index: usize, value: S) {
        {
            let mut state = lock(&self.state);
            if state.latest[index].is_none() {
                state.seen += 1;
            }
            state.latest[index] = Some(value);
            if state.seen == state.latest.len() {
                let row: Vec<S> = state.latest.iter().flatten().cloned().collect();
                if let Some(out) = (self.combine)(row) {
                    self.downstream.enqueue(Event::Next(out));
                }
            }
        }
        self.downstream.drain();
    }

    fn on_complete(&self, index: usize) {
        let finished = {
            let mut state = lock(&self.state);
            state.completed += 1;
            // a source that completes silently can never contribute
            state.completed == state.latest.len() || state.latest[index].is_none()
        };
        if finished {
            self.downstream.complete();
        }
    }

    fn on_error(&self, error: StreamError) {
        self.downstream.error(error);
    }
}

struct Amb<T> {
    downstream: Subscriber<T>,
    winner: AtomicUsize,
    contenders: Vec<Subscription>,
}

impl<T: Send + 'static> Amb<T> {
    const UNDECIDED: usize = usize::MAX;

    /// Whether events from `index` should pass, deciding the race if open
    fn admits(&self, index: usize) -> bool {
        match self.winner.compare_exchange(
            Self::UNDECIDED,
            index,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                trace!(winner = index, "amb race decided");
                for (other, contender) in self.contenders.iter().enumerate() {
                    if other != index {
                        contender.dispose();
                    }
                }
                true
            }
            Err(current) => current == index,
        }
    }
}

struct AmbInput<T> {
    amb: Arc<Amb<T>>,
    index: usize,
}

impl<T: Send + 'static> Observer<T> for AmbInput<T> {
    fn on_next(&mut self, value: T) {
        if self.amb.admits(self.index) {
            self.amb.downstream.next(value);
        }
    }

    fn on_error(&mut self, error: StreamError) {
        if self.amb.admits(self.index) {
            self.amb.downstream.error(error);
        }
    }

    fn on_complete(&mut self) {
        if self.amb.admits(self.index) {
            self.amb.downstream.complete();
        }
    }
}

type Equality<A, B> = Arc<dyn Fn(&A, &B) -> bool + Send + Sync>;

/// Pairwise comparison of two sources, settled as early as possible
struct SequenceEqual<A, B> {
    downstream: Subscriber<bool>,
    equal: Equality<A, B>,
    state: Mutex<EqualState<A, B>>,
}

struct EqualState<A, B> {
    left: VecDeque<A>,
    right: VecDeque<B>,
    done: [bool; 2],
    decided: bool,
}

impl<A, B> SequenceEqual<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    /// Compare what both sides have buffered; `Some` once the answer is known
    fn judge(&self, state: &mut EqualState<A, B>) -> Option<bool> {
        if state.decided {
            return None;
        }
        while let (Some(a), Some(b)) = (state.left.front(), state.right.front()) {
            if !(self.equal)(a, b) {
                state.decided = true;
                return Some(false);
            }
            state.left.pop_front();
            state.right.pop_front();
        }
        let left_over = state.done[0] && state.left.is_empty();
        let right_over = state.done[1] && state.right.is_empty();
        let verdict = if left_over && right_over {
            Some(true)
        } else if (left_over && !state.right.is_empty()) || (right_over && !state.left.is_empty())
        {
            Some(false)
        } else {
            None
        };
        state.decided = verdict.is_some();
        verdict
    }

    fn settle(&self, verdict: Option<bool>) {
        if let Some(equal) = verdict {
            trace!(equal, "sequence comparison decided");
            self.downstream.next(equal);
            self.downstream.complete();
        }
    }
}

impl<A, B> Joiner<Side<A, B>> for SequenceEqual<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    fn on_next(&self, _index: usize, value: Side<A, B>) {
        let verdict = {
            let mut state = lock(&self.state);
            match value {
                Side::Left(a) => state.left.push_back(a),
                Side::Right(b) => state.right.push_back(b),
            }
            self.judge(&mut state)
        };
        self.settle(verdict);
    }

    fn on_complete(&self, index: usize) {
        let verdict = {
            let mut state = lock(&self.state);
            state.done[index] = true;
            self.judge(&mut state)
        };
        self.settle(verdict);
    }

    fn on_error(&self, error: StreamError) {
        self.downstream.error(error);
    }
}

fn zip_core<S, R>(sources: Vec<Observable<S>>, combine: Combine<S, R>) -> Observable<R>
where
    S: Send + 'static,
    R: Send + 'static,
{
    Observable::create(move |downstream: Subscriber<R>| {
        if sources.is_empty() {
            downstream.complete();
            return;
        }
        let parent = downstream.subscription().clone();
        let zip = Arc::new(Zip {
            downstream,
            combine: combine.clone(),
            state: Mutex::new(ZipState {
                queues: sources.iter().map(|_| VecDeque::new()).collect(),
                done: vec![false; sources.len()],
            }),
        });
        subscribe_all(&sources, &zip, &parent);
    })
}

fn combine_latest_core<S, R>(sources: Vec<Observable<S>>, combine: Combine<S, R>) -> Observable<R>
where
    S: Clone + Send + 'static,
    R: Send + 'static,
{
    Observable::create(move |downstream: Subscriber<R>| {
        if sources.is_empty() {
            downstream.complete();
            return;
        }
        let parent = downstream.subscription().clone();
        let combiner = Arc::new(CombineLatest {
            downstream,
            combine: combine.clone(),
            state: Mutex::new(LatestState {
                latest: sources.iter().map(|_| None).collect(),
                seen: 0,
                completed: 0,
            }),
        });
        subscribe_all(&sources, &combiner, &parent);
    })
}

impl<T: Send + 'static> Observable<T> {
    /// Pair values by index across `sources`
    ///
    /// The n-th emission holds the n-th value of every source. Completes as
    /// soon as any source completed and has no unpaired values left.
    pub fn zip(sources: Vec<Observable<T>>) -> Observable<Vec<T>> {
        zip_core(sources, Arc::new(Some))
    }

    /// Pair this source with `other` by index and combine each pair with `f`
    pub fn zip_with<B, R, F>(self, other: Observable<B>, f: F) -> Observable<R>
    where
        B: Send + 'static,
        R: Send + 'static,
        F: Fn(T, B) -> R + Send + Sync + 'static,
    {
        zip_core(
            vec![self.map(Side::Left), other.map(Side::Right)],
            pair(Arc::new(f)),
        )
    }

    /// Emit the latest value of every source whenever any of them emits
    ///
    /// Nothing is emitted until each source has produced a value. A source
    /// completing without ever emitting completes the result.
    pub fn combine_latest(sources: Vec<Observable<T>>) -> Observable<Vec<T>>
    where
        T: Clone,
    {
        combine_latest_core(sources, Arc::new(Some))
    }

    pub fn combine_latest_with<B, R, F>(self, other: Observable<B>, f: F) -> Observable<R>
    where
        T: Clone,
        B: Clone + Send + 'static,
        R: Send + 'static,
        F: Fn(T, B) -> R + Send + Sync + 'static,
    {
        combine_latest_core(
            vec![self.map(Side::Left), other.map(Side::Right)],
            pair(Arc::new(f)),
        )
    }

    /// Subscribe to `sources` one after another
    pub fn concat(sources: Vec<Observable<T>>) -> Observable<T> {
        Observable::from_iter(sources).concat_map(|source| source)
    }

    /// Continue with `other` once this source completes
    pub fn concat_with(self, other: Observable<T>) -> Observable<T> {
        Observable::concat(vec![self, other])
    }

    /// Emit `values` before anything from this source
    pub fn start_with<I>(self, values: I) -> Observable<T>
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
    {
        Observable::concat(vec![Observable::from_iter(values), self])
    }

    /// Mirror whichever of `sources` signals first, disposing the rest
    pub fn amb(sources: Vec<Observable<T>>) -> Observable<T> {
        Observable::create(move |downstream: Subscriber<T>| {
            if sources.is_empty() {
                downstream.complete();
                return;
            }
            let parent = downstream.subscription().clone();
            let contenders: Vec<Subscription> =
                sources.iter().map(|_| Subscription::new()).collect();
            for contender in &contenders {
                parent.add(contender.clone());
            }
            let amb = Arc::new(Amb {
                downstream,
                winner: AtomicUsize::new(Amb::<T>::UNDECIDED),
                contenders: contenders.clone(),
            });
            for (index, (source, contender)) in sources.iter().zip(contenders).enumerate() {
                source.subscribe_with(Subscriber::with_subscription(
                    AmbInput {
                        amb: amb.clone(),
                        index,
                    },
                    contender,
                ));
            }
        })
    }

    pub fn amb_with(self, other: Observable<T>) -> Observable<T> {
        Observable::amb(vec![self, other])
    }

    /// Whether `first` and `second` emit equal values in the same order and
    /// the same number of them
    ///
    /// Emits `false` as soon as a pair differs or one side runs out early,
    /// disposing both sources.
    pub fn sequence_equal(first: Observable<T>, second: Observable<T>) -> Observable<bool>
    where
        T: PartialEq,
    {
        first.sequence_equal_by(second, |a: &T, b: &T| a == b)
    }

    /// Compare this source with `other` pairwise using `equal`
    pub fn sequence_equal_by<B, F>(self, other: Observable<B>, equal: F) -> Observable<bool>
    where
        B: Send + 'static,
        F: Fn(&T, &B) -> bool + Send + Sync + 'static,
    {
        let equal: Equality<T, B> = Arc::new(equal);
        let sources = vec![self.map(Side::Left), other.map(Side::Right)];
        Observable::create(move |downstream: Subscriber<bool>| {
            let parent = downstream.subscription().clone();
            let comparison = Arc::new(SequenceEqual {
                downstream,
                equal: equal.clone(),
                state: Mutex::new(EqualState {
                    left: VecDeque::new(),
                    right: VecDeque::new(),
                    done: [false; 2],
                    decided: false,
                }),
            });
            subscribe_all(&sources, &comparison, &parent);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hot::Subject;
    use crate::scheduler::VirtualTimeScheduler;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_zip_stops_at_shortest() {
        Observable::zip(vec![Observable::range(1, 3), Observable::range(10, 5)])
            .test()
            .assert_values(&[vec![1, 10], vec![2, 11], vec![3, 12]])
            .assert_complete();
    }

    #[test]
    fn test_zip_waits_for_pending_values() {
        let fast = Subject::publish();
        let slow = Subject::publish();
        let observer = fast
            .as_observable()
            .zip_with(slow.as_observable(), |a: i32, b: &str| format!("{a}{b}"))
            .test();

        fast.on_next(1);
        fast.on_next(2);
        fast.on_complete();
        observer.assert_value_count(0).assert_not_complete();

        slow.on_next("a");
        observer.assert_values(&["1a".to_string()]).assert_not_complete();
        slow.on_next("b");
        observer
            .assert_values(&["1a".to_string(), "2b".to_string()])
            .assert_complete();
        assert!(!slow.has_observers());
    }

    #[test]
    fn test_combine_latest_waits_for_all_sources() {
        let left = Subject::publish();
        let right = Subject::publish();
        let observer = left
            .as_observable()
            .combine_latest_with(right.as_observable(), |a: i32, b: i32| a + b)
            .test();

        left.on_next(1);
        left.on_next(2);
        observer.assert_value_count(0);
        right.on_next(10);
        left.on_next(3);
        right.on_next(20);
        observer.assert_values(&[12, 13, 23]);

        left.on_complete();
        observer.assert_not_complete();
        right.on_complete();
        observer.assert_complete();
    }

    #[test]
    fn test_combine_latest_silent_source_completes() {
        Observable::combine_latest(vec![Observable::just(1), Observable::empty()])
            .test()
            .assert_value_count(0)
            .assert_complete();
    }

    #[test]
    fn test_concat_and_start_with() {
        Observable::range(3, 2)
            .start_with(vec![1, 2])
            .concat_with(Observable::just(5))
            .test()
            .assert_values(&[1, 2, 3, 4, 5])
            .assert_complete();
    }

    #[test]
    fn test_concat_stops_on_error() {
        Observable::concat(vec![
            Observable::just(1),
            Observable::error(StreamError::source("halt")),
            Observable::just(2),
        ])
        .test()
        .assert_failure(StreamError::source("halt"), &[1]);
    }

    #[test]
    fn test_sequence_equal_same_values() {
        let digits = Observable::from_iter(vec![1, 2, 3, 4]);
        Observable::sequence_equal(Observable::range(1, 4), digits)
            .test()
            .assert_values(&[true])
            .assert_complete();
    }

    #[test]
    fn test_sequence_equal_shorter_side_differs() {
        Observable::sequence_equal(Observable::range(1, 3), Observable::range(1, 4))
            .test()
            .assert_values(&[false])
            .assert_complete();
    }

    #[test]
    fn test_sequence_equal_by_decides_on_first_mismatch() {
        let whole = Subject::publish();
        let decimal = Subject::publish();
        let observer = whole
            .as_observable()
            .sequence_equal_by(decimal.as_observable(), |w: &i64, d: &f64| *w == *d as i64)
            .test();

        whole.on_next(1);
        decimal.on_next(1.5);
        observer.assert_value_count(0);
        whole.on_next(2);
        decimal.on_next(3.0);

        observer.assert_values(&[false]).assert_complete();
        assert!(!whole.has_observers());
        assert!(!decimal.has_observers());
    }

    #[test]
    fn test_sequence_equal_passes_errors() {
        let failing = Observable::error(StreamError::source("gone"));
        Observable::sequence_equal(Observable::just(1), failing)
            .test()
            .assert_failure(StreamError::source("gone"), &[]);
    }

    #[test]
    fn test_amb_picks_first_to_signal() {
        let scheduler = VirtualTimeScheduler::new();
        let slow = Observable::timer(Duration::from_secs(5), scheduler.shared()).map(|_| "slow");
        let fast = Observable::timer(Duration::from_secs(1), scheduler.shared()).map(|_| "fast");
        let observer = slow.amb_with(fast).test();

        scheduler.advance_time_by(Duration::from_secs(10));
        observer.assert_values(&["fast"]).assert_complete();
        assert_eq!(observer.completions(), 1);
    }

    #[test]
    fn test_empty_source_lists() {
        Observable::<i32>::zip(Vec::new()).test().assert_complete();
        Observable::<i32>::amb(Vec::new()).test().assert_complete();
        Observable::<i32>::concat(Vec::new()).test().assert_complete();
    }
}
