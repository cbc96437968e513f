// Copyright (c) 2025 - Cowboy AI, Inc.
//! Schedulers and Workers
//!
//! A [`Scheduler`] decides where and when work runs. A [`Worker`] is one
//! sequential execution lane obtained from a scheduler: its tasks run one at
//! a time, FIFO by due time with ties broken by submission order. This lane
//! guarantee is what keeps per-subscription event order intact across
//! asynchronous boundaries.
//!
//! # Variants
//!
//! | Scheduler | Lane | Clock |
//! |-----------|------|-------|
//! | [`CurrentThreadScheduler`] | caller's thread, trampolined | wall |
//! | [`LaneScheduler`] | one dedicated OS thread per worker | wall |
//! | [`PoolScheduler`] | tokio tasks; direct tasks on any free thread | wall |
//! | [`VirtualTimeScheduler`] | caller of `advance_time_*` | virtual |
//!
//! Disposing a worker cancels every pending task at once; a task that has
//! already started runs to completion. A panicking task is logged and never
//! takes its lane down. Work scheduled on behalf of a stream runs through
//! [`guarded`], so the panic also fails that stream with
//! [`StreamError::TaskFailed`].
//!
//! # Example
//!
//! ```rust,ignore
//! let scheduler = VirtualTimeScheduler::new();
//! let worker = scheduler.create_worker();
//! worker.schedule(Box::new(|| println!("at 10s")), Duration::from_secs(10));
//! scheduler.advance_time_by(Duration::from_secs(15));
//! ```

pub mod current_thread;
pub mod lane;
pub mod pool;
pub(crate) mod queue;
pub mod virtual_time;

pub use current_thread::CurrentThreadScheduler;
pub use lane::LaneScheduler;
pub use pool::PoolScheduler;
pub use virtual_time::VirtualTimeScheduler;

use crate::errors::{StreamError, StreamResult};
use crate::subscription::{Subscriber, Subscription};
use crate::sync::lock;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, warn};

/// Unit of scheduled work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle cancelling one scheduled task
pub type CancelHandle = Subscription;

pub type SchedulerRef = Arc<dyn Scheduler>;
pub type WorkerRef = Arc<dyn Worker>;

/// Source of workers and of the clock they run against
pub trait Scheduler: Send + Sync + 'static {
    /// Time elapsed on this scheduler's clock
    fn now(&self) -> Duration;

    /// Create a new sequential lane
    fn create_worker(&self) -> WorkerRef;

    /// Run `task` once after `delay` on a lane of its own
    fn schedule_direct(&self, task: Task, delay: Duration) -> CancelHandle {
        let worker = self.create_worker();
        let finished = worker.clone();
        let handle = worker.schedule(
            Box::new(move || {
                task();
                finished.dispose();
            }),
            delay,
        );
        handle.add_teardown(move || worker.dispose());
        handle
    }
}

/// A sequential execution lane
pub trait Worker: Send + Sync + 'static {
    /// Time elapsed on the owning scheduler's clock
    fn now(&self) -> Duration;

    /// Queue `task` to run after `delay`
    ///
    /// Returns an already-disposed handle if the worker is disposed.
    fn schedule(&self, task: Task, delay: Duration) -> CancelHandle;

    /// Cancel all pending tasks and refuse new ones
    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

/// Create a worker that is disposed together with `owner`
pub fn worker_for(scheduler: &SchedulerRef, owner: &Subscription) -> WorkerRef {
    let worker = scheduler.create_worker();
    let lane = worker.clone();
    owner.add_teardown(move || lane.dispose());
    worker
}

/// Run `task` repeatedly on `worker`, first after `initial_delay`, then
/// every `period`
///
/// Due times are computed from the first due time rather than from when
/// each run finished, so slow tasks do not accumulate drift.
pub fn schedule_periodic<F>(
    worker: &WorkerRef,
    initial_delay: Duration,
    period: Duration,
    task: F,
) -> CancelHandle
where
    F: FnMut() + Send + 'static,
{
    let handle = Subscription::new();
    let periodic = Arc::new(Periodic {
        worker: worker.clone(),
        task: Mutex::new(task),
        start: worker.now() + initial_delay,
        period,
        runs: AtomicU64::new(0),
        handle: handle.clone(),
    });
    periodic.arm(initial_delay);
    handle
}

struct Periodic<F> {
    worker: WorkerRef,
    task: Mutex<F>,
    start: Duration,
    period: Duration,
    runs: AtomicU64,
    handle: Subscription,
}

impl<F> Periodic<F>
where
    F: FnMut() + Send + 'static,
{
    fn arm(self: Arc<Self>, delay: Duration) {
        let me = self.clone();
        self.worker.schedule(Box::new(move || me.fire()), delay);
    }

    fn fire(self: Arc<Self>) {
        if self.handle.is_disposed() {
            return;
        }
        let outcome = {
            let mut task = lock(&self.task);
            contain(|| (&mut *task)())
        };
        if outcome.is_err() {
            warn!("periodic task panicked; not rescheduling");
            self.handle.dispose();
            return;
        }
        let runs = self.runs.fetch_add(1, Ordering::AcqRel) + 1;
        if self.handle.is_disposed() {
            return;
        }
        let period_nanos = self.period.as_nanos().saturating_mul(u128::from(runs));
        let offset = Duration::from_nanos(u64::try_from(period_nanos).unwrap_or(u64::MAX));
        let due = self.start + offset;
        let delay = due.saturating_sub(self.worker.now());
        self.arm(delay);
    }
}

/// Run one task, containing any panic to the task itself
pub(crate) fn run_task(task: Task) -> Result<(), String> {
    contain(task)
}

/// Run `work` for `downstream`; a panic fails it with `TaskFailed`
pub(crate) fn guarded<T, F>(downstream: &Subscriber<T>, work: F)
where
    T: Send + 'static,
    F: FnOnce(),
{
    if let Err(message) = contain(work) {
        downstream.error(StreamError::TaskFailed(message));
    }
}

pub(crate) fn contain<F: FnOnce()>(work: F) -> Result<(), String> {
    catch_unwind(AssertUnwindSafe(work)).map_err(|panic| {
        let message = panic_message(panic.as_ref());
        error!(panic = %message, "scheduled task panicked; lane continues");
        message
    })
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Trampolining scheduler on the calling thread
pub fn current_thread() -> SchedulerRef {
    Arc::new(CurrentThreadScheduler::new())
}

/// One dedicated thread per worker
pub fn new_lane() -> SchedulerRef {
    Arc::new(LaneScheduler::default())
}

/// Scheduler backed by the ambient tokio runtime
pub fn pool() -> StreamResult<SchedulerRef> {
    Ok(Arc::new(PoolScheduler::current()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_periodic_runs_without_drift() {
        let scheduler = VirtualTimeScheduler::new();
        let worker = scheduler.create_worker();
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = ticks.clone();
        let clock = scheduler.clone();

        let handle = schedule_periodic(
            &worker,
            Duration::from_secs(1),
            Duration::from_secs(2),
            move || sink.lock().unwrap().push(clock.now()),
        );

        scheduler.advance_time_by(Duration::from_secs(6));
        handle.dispose();
        scheduler.advance_time_by(Duration::from_secs(10));

        assert_eq!(
            *ticks.lock().unwrap(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5)
            ]
        );
    }

    #[test]
    fn test_panicking_periodic_task_stops() {
        let scheduler = VirtualTimeScheduler::new();
        let worker = scheduler.create_worker();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let handle = schedule_periodic(
            &worker,
            Duration::from_secs(1),
            Duration::from_secs(1),
            move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                    panic!("second run fails");
                }
            },
        );

        scheduler.advance_time_by(Duration::from_secs(10));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(handle.is_disposed());
        assert!(!worker.is_disposed());
    }

    #[test]
    fn test_guarded_routes_panic_to_subscriber() {
        let observer = crate::testing::TestObserver::<i32>::new();
        let subscriber = Subscriber::new(observer.clone());
        guarded(&subscriber, || {
            subscriber.next(1);
            panic!("mid emission");
        });
        subscriber.next(2);
        observer.assert_failure(StreamError::TaskFailed("mid emission".into()), &[1]);
    }

    #[test]
    fn test_schedule_direct_runs_once() {
        let scheduler = VirtualTimeScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        scheduler.schedule_direct(
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Duration::from_secs(1),
        );
        scheduler.advance_time_by(Duration::from_secs(5));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_task_contains_panic() {
        let result = run_task(Box::new(|| panic!("kaboom")));
        assert_eq!(result, Err("kaboom".to_string()));
    }
}
