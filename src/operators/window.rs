// Copyright (c) 2025 - Cowboy AI, Inc.
//! Windowing operators.
//!
//! Windows are like buffers, except that each group is delivered as a nested
//! [`Observable`] as soon as it opens rather than as a vector once it closes.
//! Every window is backed by a replay subject, so subscribing to a window
//! late never misses values that already went into it.

use super::stage::Stage;
use crate::errors::StreamError;
use crate::event::Event;
use crate::hot::Subject;
use crate::observable::Observable;
use crate::observer::Observer;
use crate::scheduler::{guarded, worker_for, SchedulerRef, WorkerRef};
use crate::subscription::{SerialSubscription, Subscriber};
use crate::sync::lock;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct WindowStage<T> {
    size: usize,
    current: Option<Subject<T>>,
    count: usize,
}

impl<T: Clone + Send + 'static> Stage<T, Observable<T>> for WindowStage<T> {
    fn process(&mut self, event: Event<T>) -> Vec<Event<Observable<T>>> {
        match event {
            Event::Next(value) => {
                let mut out = Vec::new();
                if self.current.is_none() {
                    let window = Subject::replay(None);
                    out.push(Event::Next(window.as_observable()));
                    self.current = Some(window);
                    self.count = 0;
                }
                if let Some(window) = &self.current {
                    window.on_next(value);
                }
                self.count += 1;
                if self.count >= self.size {
                    if let Some(window) = self.current.take() {
                        window.on_complete();
                    }
                }
                out
            }
            Event::Error(error) => {
                if let Some(window) = self.current.take() {
                    window.on_error(error.clone());
                }
                vec![Event::Error(error)]
            }
            Event::Complete => {
                if let Some(window) = self.current.take() {
                    window.on_complete();
                }
                vec![Event::Complete]
            }
        }
    }
}

struct TimedWindows<T> {
    state: Mutex<WindowState<T>>,
    downstream: Subscriber<Observable<T>>,
    worker: WorkerRef,
    timer: SerialSubscription,
    timespan: Duration,
    max_size: usize,
}

struct WindowState<T> {
    current: Option<Subject<T>>,
    count: usize,
    generation: u64,
    done: bool,
}

impl<T: Clone + Send + 'static> TimedWindows<T> {
    /// Close the open window and start the next one; caller holds the lock
    fn rotate(&self, state: &mut WindowState<T>) -> u64 {
        if let Some(window) = state.current.take() {
            window.on_complete();
        }
        let window = Subject::replay(None);
        state.current = Some(window.clone());
        state.count = 0;
        state.generation += 1;
        self.downstream.next(window.as_observable());
        state.generation
    }

    fn arm(self: &Arc<Self>, generation: u64) {
        let me = self.clone();
        let handle = self.worker.schedule(
            Box::new(move || {
                let downstream = me.downstream.clone();
                guarded(&downstream, || me.on_timer(generation));
            }),
            self.timespan,
        );
        self.timer.replace(handle);
    }

    fn on_timer(self: &Arc<Self>, generation: u64) {
        let next = {
            let mut state = lock(&self.state);
            if state.done || state.generation != generation {
                return;
            }
            self.rotate(&mut state)
        };
        self.arm(next);
    }

    fn start(self: &Arc<Self>) {
        let generation = self.rotate(&mut lock(&self.state));
        self.arm(generation);
    }

    fn finish(&self, event: Event<T>) {
        let window = {
            let mut state = lock(&self.state);
            if state.done {
                return;
            }
            state.done = true;
            state.current.take()
        };
        self.timer.dispose();
        match event {
            Event::Error(error) => {
                if let Some(window) = window {
                    window.on_error(error.clone());
                }
                self.downstream.error(error);
            }
            _ => {
                if let Some(window) = window {
                    window.on_complete();
                }
                self.downstream.complete();
            }
        }
    }
}

struct TimedWindowInput<T> {
    windows: Arc<TimedWindows<T>>,
}

impl<T: Clone + Send + 'static> Observer<T> for TimedWindowInput<T> {
    fn on_next(&mut self, value: T) {
        let rotated = {
            let mut state = lock(&self.windows.state);
            if state.done {
                return;
            }
            if let Some(window) = &state.current {
                window.on_next(value);
            }
            state.count += 1;
            if state.count >= self.windows.max_size {
                Some(self.windows.rotate(&mut state))
            } else {
                None
            }
        };
        if let Some(generation) = rotated {
            self.windows.arm(generation);
        }
    }

    fn on_error(&mut self, error: StreamError) {
        self.windows.finish(Event::Error(error));
    }

    fn on_complete(&mut self) {
        self.windows.finish(Event::Complete);
    }
}

impl<T: Clone + Send + 'static> Observable<T> {
    /// Split values into nested observables of `size` values each
    ///
    /// A window opens with its first value; the last one may be partial.
    /// A zero `size` fails with `Configuration`.
    pub fn window(self, size: usize) -> Observable<Observable<T>> {
        if size == 0 {
            return Observable::error(StreamError::Configuration(
                "window size must be positive".into(),
            ));
        }
        self.lift(move || WindowStage {
            size,
            current: None,
            count: 0,
        })
    }

    /// Split values into consecutive windows lasting `timespan` on
    /// `scheduler`, closing a window early once it holds `max_size` values
    ///
    /// The first window opens on subscription. Closing early restarts the
    /// timer for the next window.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// source
    ///     .window_time(Duration::from_secs(1), 100, scheduler)
    ///     .flat_map(|window| window.count())
    /// ```
    pub fn window_time(
        self,
        timespan: Duration,
        max_size: usize,
        scheduler: SchedulerRef,
    ) -> Observable<Observable<T>> {
        if max_size == 0 {
            return Observable::error(StreamError::Configuration(
                "window max size must be positive".into(),
            ));
        }
        Observable::create(move |downstream: Subscriber<Observable<T>>| {
            let parent = downstream.subscription().clone();
            let timer = SerialSubscription::new();
            timer.bind(&parent);
            let windows = Arc::new(TimedWindows {
                state: Mutex::new(WindowState {
                    current: None,
                    count: 0,
                    generation: 0,
                    done: false,
                }),
                downstream,
                worker: worker_for(&scheduler, &parent),
                timer,
                timespan,
                max_size,
            });
            windows.start();
            self.subscribe_with(Subscriber::linked(
                &parent,
                TimedWindowInput { windows },
            ));
        })
    }

    /// Collect values into vectors, one per `timespan` on `scheduler`
    ///
    /// Periods without values emit an empty vector.
    pub fn buffer_time(self, timespan: Duration, scheduler: SchedulerRef) -> Observable<Vec<T>> {
        self.window_time(timespan, usize::MAX, scheduler)
            .concat_map(|window| window.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::VirtualTimeScheduler;
    use crate::testing::TestObserver;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_count_windows() {
        let windows = Observable::range(1, 7).window(3).test();
        windows.assert_value_count(3).assert_complete();

        let contents: Vec<Vec<i64>> = windows
            .values()
            .into_iter()
            .map(|window| window.to_vec().test().values().remove(0))
            .collect();
        assert_eq!(contents, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
    }

    #[test]
    fn test_window_error_reaches_open_window() {
        let windows = Observable::from_iter(vec![1, 2])
            .concat_with(Observable::error(StreamError::source("x")))
            .window(5)
            .test();
        windows.assert_error(StreamError::source("x"));
        windows.values()[0]
            .test()
            .assert_failure(StreamError::source("x"), &[1, 2]);
    }

    #[test]
    fn test_window_time_rotates_on_timer_and_size() {
        let scheduler = VirtualTimeScheduler::new();
        let subject = Subject::publish();
        let windows = subject
            .as_observable()
            .window_time(Duration::from_secs(10), 2, scheduler.shared())
            .test();
        windows.assert_value_count(1);

        subject.on_next(1);
        subject.on_next(2); // full: second window opens, timer restarts
        windows.assert_value_count(2);

        scheduler.advance_time_by(Duration::from_secs(5));
        subject.on_next(3);
        scheduler.advance_time_by(Duration::from_secs(5)); // 10s after restart
        windows.assert_value_count(3);

        subject.on_complete();
        windows.assert_complete();

        let contents: Vec<Vec<i32>> = windows
            .values()
            .into_iter()
            .map(|window| window.to_vec().test().values().remove(0))
            .collect();
        assert_eq!(contents, vec![vec![1, 2], vec![3], vec![]]);
    }

    #[test]
    fn test_buffer_time_groups_by_period() {
        let scheduler = VirtualTimeScheduler::new();
        let observer = TestObserver::with_clock(scheduler.shared());
        Observable::interval(Duration::from_millis(300), scheduler.shared())
            .take(7)
            .buffer_time(Duration::from_secs(1), scheduler.shared())
            .subscribe(observer.clone());

        scheduler.advance_time_by(Duration::from_secs(3));
        observer
            .assert_values(&[vec![0, 1, 2], vec![3, 4, 5], vec![6]])
            .assert_complete();
    }
}
