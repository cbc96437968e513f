// Copyright (c) 2025 - Cowboy AI, Inc.
//! Stage-based operators: transformation, filtering, aggregation and side
//! effects.

use super::stage::{
    ChunkStage, DistinctUntilChangedStage, FilterStage, FnStage, MapStage, QuantifierStage,
    ReduceStage, ReduceWithStage, ScanStage, SingleStage, SkipStage, TakeLastStage, TakeStage,
    TryMapStage,
};
use crate::errors::StreamError;
use crate::event::Event;
use crate::observable::Observable;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

impl<T: Send + 'static> Observable<T> {
    /// Transform every value with `f`
    pub fn map<U, F>(self, f: F) -> Observable<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move || MapStage::new(f.clone()))
    }

    /// Transform every value with a fallible `f`
    ///
    /// The first `Err` terminates the stream with [`StreamError::Transform`]
    /// and disposes upstream.
    pub fn try_map<U, E, F>(self, f: F) -> Observable<U>
    where
        U: Send + 'static,
        E: Display + 'static,
        F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move || TryMapStage::new(f.clone()))
    }

    /// Keep only values matching `predicate`
    pub fn filter<P>(self, predicate: P) -> Observable<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.lift(move || FilterStage::new(predicate.clone()))
    }

    /// Emit the running accumulation of `f` over the values
    ///
    /// The seed itself is not emitted.
    pub fn scan<A, F>(self, seed: A, f: F) -> Observable<A>
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(A, T) -> A + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move || ScanStage::new(seed.clone(), f.clone()))
    }

    /// Emit only the final accumulation, or `seed` for an empty stream
    pub fn reduce<A, F>(self, seed: A, f: F) -> Observable<A>
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(A, T) -> A + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move || ReduceStage::new(seed.clone(), f.clone()))
    }

    /// Fold values pairwise; an empty stream completes without a value
    pub fn reduce_with<F>(self, f: F) -> Observable<T>
    where
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move || ReduceWithStage::new(f.clone()))
    }

    /// Group values into vectors of `size`
    ///
    /// A trailing partial group is emitted on completion.
    pub fn buffer(self, size: usize) -> Observable<Vec<T>>
    where
        T: Clone,
    {
        self.buffer_skip(size, size)
    }

    /// Open a group of up to `size` values every `skip` values
    ///
    /// `skip < size` overlaps groups, `skip > size` drops the values between
    /// them. A zero `size` or `skip` fails with `Configuration`.
    pub fn buffer_skip(self, size: usize, skip: usize) -> Observable<Vec<T>>
    where
        T: Clone,
    {
        if size == 0 || skip == 0 {
            return Observable::error(StreamError::Configuration(format!(
                "buffer size and skip must be positive (size {size}, skip {skip})"
            )));
        }
        self.lift(move || ChunkStage::new(size, skip))
    }

    /// Emit the first `count` values, then complete
    pub fn take(self, count: u64) -> Observable<T> {
        if count == 0 {
            return Observable::empty();
        }
        self.lift(move || TakeStage::new(count))
    }

    /// Drop the first `count` values
    pub fn skip(self, count: u64) -> Observable<T> {
        self.lift(move || SkipStage::new(count))
    }

    /// Emit only the last `count` values, on completion
    pub fn take_last(self, count: usize) -> Observable<T> {
        self.lift(move || TakeLastStage::new(count))
    }

    /// The first value, if any; an empty stream just completes
    pub fn first_element(self) -> Observable<T> {
        self.take(1)
    }

    /// Same as [`first_element`](Self::first_element)
    pub fn first(self) -> Observable<T> {
        self.first_element()
    }

    /// The first value; an empty stream fails with `ElementCount`
    pub fn first_or_error(self) -> Observable<T> {
        self.first_element().lift(|| {
            let mut seen = false;
            FnStage::new(move |event: Event<T>| match event {
                Event::Next(value) => {
                    seen = true;
                    vec![Event::Next(value)]
                }
                Event::Complete if !seen => vec![Event::Error(StreamError::ElementCount(
                    "expected a value, the stream was empty".to_string(),
                ))],
                other => vec![other],
            })
        })
    }

    /// The only value, on completion; an empty stream just completes
    ///
    /// A second value fails the stream with `ElementCount` and disposes
    /// upstream.
    pub fn single_element(self) -> Observable<T> {
        self.lift(|| SingleStage::new(false))
    }

    /// Like [`single_element`](Self::single_element), but an empty stream
    /// fails with `ElementCount` too
    pub fn single_or_error(self) -> Observable<T> {
        self.lift(|| SingleStage::new(true))
    }

    /// Drop values equal to their predecessor
    pub fn distinct_until_changed(self) -> Observable<T>
    where
        T: Clone + PartialEq,
    {
        self.lift(DistinctUntilChangedStage::new)
    }

    /// Whether every value matches; stops at the first mismatch
    pub fn all<P>(self, predicate: P) -> Observable<bool>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.lift(move || QuantifierStage::all(predicate.clone()))
    }

    /// Whether some value matches; stops at the first match
    pub fn any<P>(self, predicate: P) -> Observable<bool>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.lift(move || QuantifierStage::any(predicate.clone()))
    }

    pub fn contains(self, value: T) -> Observable<bool>
    where
        T: PartialEq + Sync,
    {
        self.any(move |candidate| *candidate == value)
    }

    /// Number of values, on completion
    pub fn count(self) -> Observable<u64> {
        self.reduce(0u64, |count, _| count + 1)
    }

    /// All values in one vector, on completion
    pub fn to_vec(self) -> Observable<Vec<T>> {
        self.lift(|| {
            let mut items = Vec::new();
            FnStage::new(move |event: Event<T>| match event {
                Event::Next(value) => {
                    items.push(value);
                    Vec::new()
                }
                Event::Error(error) => vec![Event::Error(error)],
                Event::Complete => vec![Event::Next(std::mem::take(&mut items)), Event::Complete],
            })
        })
    }

    /// All values keyed by `key`, on completion; later values win
    pub fn to_map<K, F>(self, key: F) -> Observable<HashMap<K, T>>
    where
        K: Eq + Hash + Send + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        let key = Arc::new(key);
        self.lift(move || {
            let key = key.clone();
            let mut items = HashMap::new();
            FnStage::new(move |event: Event<T>| match event {
                Event::Next(value) => {
                    items.insert(key(&value), value);
                    Vec::new()
                }
                Event::Error(error) => vec![Event::Error(error)],
                Event::Complete => vec![Event::Next(std::mem::take(&mut items)), Event::Complete],
            })
        })
    }

    /// Fold values into a container built by `init`, on completion
    pub fn collect<C, I, F>(self, init: I, f: F) -> Observable<C>
    where
        C: Send + 'static,
        I: Fn() -> C + Send + Sync + 'static,
        F: Fn(&mut C, T) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move || {
            let f = f.clone();
            let mut container = Some(init());
            FnStage::new(move |event: Event<T>| match event {
                Event::Next(value) => {
                    if let Some(container) = container.as_mut() {
                        f(container, value);
                    }
                    Vec::new()
                }
                Event::Error(error) => vec![Event::Error(error)],
                Event::Complete => container
                    .take()
                    .map(Event::Next)
                    .into_iter()
                    .chain(std::iter::once(Event::Complete))
                    .collect(),
            })
        })
    }

    /// Apply a reusable chain of operators
    ///
    /// ```rust,ignore
    /// fn evens(source: Observable<i64>) -> Observable<i64> {
    ///     source.filter(|v| v % 2 == 0)
    /// }
    /// let doubled_evens = Observable::range(0, 10).compose(evens).map(|v| v * 2);
    /// ```
    pub fn compose<U, F>(self, transformer: F) -> Observable<U>
    where
        U: Send + 'static,
        F: FnOnce(Observable<T>) -> Observable<U>,
    {
        transformer(self)
    }

    /// All values grouped by `key` and mapped by `value`, on completion
    ///
    /// Each group keeps its values in arrival order.
    pub fn to_multimap<K, V, KF, VF>(self, key: KF, value: VF) -> Observable<HashMap<K, Vec<V>>>
    where
        K: Eq + Hash + Send + 'static,
        V: Send + 'static,
        KF: Fn(&T) -> K + Send + Sync + 'static,
        VF: Fn(T) -> V + Send + Sync + 'static,
    {
        let key = Arc::new(key);
        let value = Arc::new(value);
        self.lift(move || {
            let (key, value) = (key.clone(), value.clone());
            let mut groups: HashMap<K, Vec<V>> = HashMap::new();
            FnStage::new(move |event: Event<T>| match event {
                Event::Next(item) => {
                    groups.entry(key(&item)).or_default().push(value(item));
                    Vec::new()
                }
                Event::Error(error) => vec![Event::Error(error)],
                Event::Complete => vec![Event::Next(std::mem::take(&mut groups)), Event::Complete],
            })
        })
    }

    /// Run `f` on every value before passing it on
    pub fn do_on_next<F>(self, f: F) -> Observable<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move || {
            let f = f.clone();
            FnStage::new(move |event: Event<T>| {
                if let Event::Next(value) = &event {
                    f(value);
                }
                vec![event]
            })
        })
    }

    pub fn do_on_error<F>(self, f: F) -> Observable<T>
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move || {
            let f = f.clone();
            FnStage::new(move |event: Event<T>| {
                if let Event::Error(error) = &event {
                    f(error);
                }
                vec![event]
            })
        })
    }

    pub fn do_on_complete<F>(self, f: F) -> Observable<T>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move || {
            let f = f.clone();
            FnStage::new(move |event: Event<T>| {
                if matches!(event, Event::Complete) {
                    f();
                }
                vec![event]
            })
        })
    }

    /// Run `f` just before either terminal event is passed on
    pub fn do_on_terminate<F>(self, f: F) -> Observable<T>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.lift(move || {
            let f = f.clone();
            FnStage::new(move |event: Event<T>| {
                if event.is_terminal() {
                    f();
                }
                vec![event]
            })
        })
    }

    /// Run `f` when the subscriber disposes before a terminal event
    pub fn do_on_dispose<F>(self, f: F) -> Observable<T>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Observable::create(move |downstream| {
            let terminated = Arc::new(AtomicBool::new(false));
            let on_dispose = f.clone();
            let finished = terminated.clone();
            downstream.subscription().add_teardown(move || {
                if !finished.load(Ordering::Acquire) {
                    on_dispose();
                }
            });
            self.clone()
                .lift(move || {
                    let terminated = terminated.clone();
                    FnStage::new(move |event: Event<T>| {
                        if event.is_terminal() {
                            terminated.store(true, Ordering::Release);
                        }
                        vec![event]
                    })
                })
                .subscribe_with(downstream);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use test_case::test_case;

    #[test]
    fn test_map_filter_chain() {
        Observable::range(1, 10)
            .filter(|v| v % 3 == 0)
            .map(|v| v * 2)
            .test()
            .assert_values(&[6, 12, 18])
            .assert_complete();
    }

    #[test]
    fn test_try_map_fails_and_disposes_upstream() {
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = produced.clone();
        Observable::range(1, 100)
            .do_on_next(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .try_map(|v| if v == 3 { Err("three") } else { Ok(v) })
            .test()
            .assert_failure(StreamError::Transform("three".into()), &[1, 2]);
        assert_eq!(produced.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_scan_omits_seed() {
        Observable::range(1, 4)
            .scan(0, |acc, v| acc + v)
            .test()
            .assert_values(&[1, 3, 6, 10]);
    }

    #[test]
    fn test_reduce_emits_seed_for_empty() {
        Observable::<i64>::empty()
            .reduce(42, |acc, v| acc + v)
            .test()
            .assert_values(&[42])
            .assert_complete();
    }

    #[test]
    fn test_reduce_error_emits_only_error() {
        Observable::from_iter(vec![1, 2])
            .concat_with(Observable::error(StreamError::source("bad")))
            .reduce(0, |acc, v| acc + v)
            .test()
            .assert_failure(StreamError::source("bad"), &[]);
    }

    #[test_case(10, 3, 4 ; "partial tail")]
    #[test_case(9, 3, 3 ; "exact")]
    #[test_case(0, 5, 0 ; "empty")]
    fn test_buffer_group_count(length: u64, size: usize, groups: usize) {
        Observable::range(0, length)
            .buffer(size)
            .test()
            .assert_value_count(groups)
            .assert_complete();
    }

    #[test]
    fn test_buffer_zero_is_configuration_error() {
        let observer = Observable::range(0, 3).buffer(0).test();
        assert!(matches!(
            observer.errors().as_slice(),
            [StreamError::Configuration(_)]
        ));
    }

    #[test]
    fn test_take_completes_and_disposes_upstream() {
        let subject = crate::hot::Subject::publish();
        let observer = subject.as_observable().take(2).test();
        subject.on_next(0);
        subject.on_next(1);
        subject.on_next(2);
        observer.assert_values(&[0, 1]).assert_complete();
        assert!(!subject.has_observers());
    }

    #[test]
    fn test_take_zero_is_empty() {
        Observable::range(0, 3).take(0).test().assert_value_count(0).assert_complete();
    }

    #[test]
    fn test_skip_take_last_first() {
        Observable::range(1, 5).skip(2).test().assert_values(&[3, 4, 5]);
        Observable::range(1, 5).take_last(2).test().assert_values(&[4, 5]);
        Observable::range(7, 5).first().test().assert_values(&[7]).assert_complete();
    }

    #[test]
    fn test_distinct_until_changed() {
        Observable::from_iter(vec![1, 1, 2, 2, 2, 1, 3, 3])
            .distinct_until_changed()
            .test()
            .assert_values(&[1, 2, 1, 3]);
    }

    #[test]
    fn test_quantifiers_and_count() {
        Observable::range(1, 5).all(|v| *v > 0).test().assert_values(&[true]);
        Observable::range(1, 5).all(|v| *v < 3).test().assert_values(&[false]);
        Observable::range(1, 5).contains(4).test().assert_values(&[true]);
        Observable::range(1, 5).contains(9).test().assert_values(&[false]);
        Observable::range(1, 5).count().test().assert_values(&[5]);
    }

    #[test]
    fn test_to_vec_and_to_map() {
        Observable::range(1, 3)
            .to_vec()
            .test()
            .assert_values(&[vec![1, 2, 3]]);

        let maps = Observable::from_iter(vec!["alpha", "beta", "avocado"])
            .to_map(|word| word.chars().next().unwrap_or(' '))
            .test()
            .values();
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].get(&'a'), Some(&"avocado"));
        assert_eq!(maps[0].get(&'b'), Some(&"beta"));
    }

    #[test]
    fn test_to_multimap_groups_in_arrival_order() {
        let cars = vec![("civic", 2016), ("golf", 2012), ("civic", 2019), ("golf", 2020)];
        let maps = Observable::from_iter(cars)
            .to_multimap(|(name, _)| *name, |(_, year)| year)
            .test()
            .values();
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].get("civic"), Some(&vec![2016, 2019]));
        assert_eq!(maps[0].get("golf"), Some(&vec![2012, 2020]));
    }

    #[test]
    fn test_collect_into_container() {
        let joined = Observable::from_iter(vec!["a", "b", "c"])
            .collect(String::new, |text, part| text.push_str(part))
            .test();
        joined.assert_values(&["abc".to_string()]).assert_complete();
    }

    #[test]
    fn test_compose_reuses_operator_chain() {
        fn evens(source: Observable<i64>) -> Observable<i64> {
            source.filter(|v| v % 2 == 0)
        }
        Observable::range(0, 7)
            .compose(evens)
            .map(|v| v * 10)
            .test()
            .assert_values(&[0, 20, 40, 60])
            .assert_complete();
    }

    #[test_case(0, &[] ; "empty completes")]
    #[test_case(1, &[1] ; "one value passes")]
    fn test_single_element(count: u64, expected: &[i64]) {
        Observable::range(1, count)
            .single_element()
            .test()
            .assert_values(expected)
            .assert_complete();
    }

    #[test]
    fn test_single_element_fails_on_second_value() {
        let upstream_disposed = Arc::new(AtomicBool::new(false));
        let flag = upstream_disposed.clone();
        let source = crate::hot::Subject::publish();
        let observer = source
            .as_observable()
            .do_on_dispose(move || flag.store(true, Ordering::SeqCst))
            .single_element()
            .test();

        source.on_next("only");
        observer.assert_value_count(0);
        source.on_next("extra");

        observer.assert_failure(
            StreamError::ElementCount("expected at most one value, got more".to_string()),
            &[],
        );
        assert!(upstream_disposed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_or_error_variants_reject_empty() {
        let empty = Observable::<i32>::empty();
        let failed = empty.clone().single_or_error().test().errors();
        assert!(matches!(failed.as_slice(), [StreamError::ElementCount(_)]));

        let failed = empty.first_or_error().test().errors();
        assert!(matches!(failed.as_slice(), [StreamError::ElementCount(_)]));

        Observable::range(4, 3)
            .first_or_error()
            .test()
            .assert_values(&[4])
            .assert_complete();
        Observable::just(9)
            .single_or_error()
            .test()
            .assert_values(&[9])
            .assert_complete();
    }

    #[test]
    fn test_side_effect_hooks_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (next, done, terminate) = (log.clone(), log.clone(), log.clone());
        Observable::range(1, 2)
            .do_on_next(move |v| next.lock().unwrap().push(format!("next {v}")))
            .do_on_complete(move || done.lock().unwrap().push("complete".to_string()))
            .do_on_terminate(move || terminate.lock().unwrap().push("terminate".to_string()))
            .test()
            .assert_complete();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["next 1", "next 2", "complete", "terminate"]
        );
    }

    #[test]
    fn test_do_on_error_sees_failure() {
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        Observable::<i32>::error(StreamError::source("x"))
            .do_on_error(move |e| *slot.lock().unwrap() = Some(e.clone()))
            .test();
        assert_eq!(*seen.lock().unwrap(), Some(StreamError::source("x")));
    }

    #[test]
    fn test_do_on_dispose_only_on_explicit_dispose() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let counter = disposed.clone();
        Observable::range(1, 3)
            .do_on_dispose(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .test()
            .assert_complete();
        assert_eq!(disposed.load(Ordering::SeqCst), 0);

        let counter = disposed.clone();
        let observer = Observable::<i32>::never()
            .do_on_dispose(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .test();
        observer.dispose();
        observer.dispose();
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }
}
