// Copyright (c) 2025 - Cowboy AI, Inc.
//! Virtual Time Scheduler
//!
//! A deterministic scheduler for tests. Nothing runs until the harness moves
//! the clock; advancing it fires every task that became due, in due order,
//! synchronously on the caller's thread.
//!
//! ```rust,ignore
//! let scheduler = VirtualTimeScheduler::new();
//! let worker = scheduler.create_worker();
//! worker.schedule(task_a, Duration::from_secs(10));
//! worker.schedule(task_b, Duration::from_secs(20));
//!
//! scheduler.advance_time_by(Duration::from_secs(15)); // runs task_a
//! scheduler.advance_time_by(Duration::from_secs(10)); // runs task_b
//! ```

use super::queue::TimedQueue;
use super::{run_task, CancelHandle, Scheduler, SchedulerRef, Task, Worker, WorkerRef};
use crate::subscription::Subscription;
use crate::sync::lock;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scheduler whose clock only moves when told to
#[derive(Clone, Default)]
pub struct VirtualTimeScheduler {
    inner: Arc<Mutex<VirtualState>>,
}

#[derive(Default)]
struct VirtualState {
    now: Duration,
    queue: TimedQueue,
}

impl VirtualTimeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle usable wherever a [`SchedulerRef`] is expected
    pub fn shared(&self) -> SchedulerRef {
        Arc::new(self.clone())
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        lock(&self.inner).now
    }

    /// Move the clock forward by `delta`, running every task that falls due
    pub fn advance_time_by(&self, delta: Duration) {
        let target = self.now() + delta;
        self.run_until(target);
    }

    /// Move the clock to `instant`, running every task that falls due
    ///
    /// Moving backwards is not possible; an earlier instant only runs tasks
    /// already due.
    pub fn advance_time_to(&self, instant: Duration) {
        let target = instant.max(self.now());
        self.run_until(target);
    }

    /// Run tasks due at the current time without moving the clock
    pub fn trigger_due_tasks(&self) {
        let now = self.now();
        self.run_until(now);
    }

    /// Tasks still queued, cancelled ones included
    pub fn pending(&self) -> usize {
        lock(&self.inner).queue.len()
    }

    fn run_until(&self, target: Duration) {
        loop {
            let next = {
                let mut state = lock(&self.inner);
                match state.queue.pop_due(target) {
                    Some(task) => {
                        state.now = state.now.max(task.due);
                        task
                    }
                    None => {
                        state.now = state.now.max(target);
                        return;
                    }
                }
            };
            if !next.is_cancelled() {
                let _ = run_task(next.task);
            }
        }
    }

    fn enqueue(&self, task: Task, delay: Duration, owner: Option<Subscription>) -> CancelHandle {
        let handle = Subscription::new();
        let mut state = lock(&self.inner);
        let due = state.now + delay;
        state.queue.push(due, task, handle.clone(), owner);
        handle
    }
}

impl Scheduler for VirtualTimeScheduler {
    fn now(&self) -> Duration {
        VirtualTimeScheduler::now(self)
    }

    fn create_worker(&self) -> WorkerRef {
        Arc::new(VirtualWorker {
            scheduler: self.clone(),
            lifetime: Subscription::new(),
        })
    }

    fn schedule_direct(&self, task: Task, delay: Duration) -> CancelHandle {
        self.enqueue(task, delay, None)
    }
}

struct VirtualWorker {
    scheduler: VirtualTimeScheduler,
    lifetime: Subscription,
}

impl Worker for VirtualWorker {
    fn now(&self) -> Duration {
        self.scheduler.now()
    }

    fn schedule(&self, task: Task, delay: Duration) -> CancelHandle {
        if self.lifetime.is_disposed() {
            return Subscription::disposed();
        }
        self.scheduler.enqueue(task, delay, Some(self.lifetime.clone()))
    }

    fn dispose(&self) {
        self.lifetime.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.lifetime.is_disposed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn push(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Task {
        let log = log.clone();
        Box::new(move || log.lock().unwrap().push(name))
    }

    #[test]
    fn test_advance_fires_only_due_tasks() {
        let scheduler = VirtualTimeScheduler::new();
        let worker = scheduler.create_worker();
        let log = Arc::new(Mutex::new(Vec::new()));

        worker.schedule(push(&log, "t10"), Duration::from_secs(10));
        worker.schedule(push(&log, "t20"), Duration::from_secs(20));

        scheduler.advance_time_by(Duration::from_secs(15));
        assert_eq!(*log.lock().unwrap(), vec!["t10"]);
        assert_eq!(scheduler.now(), Duration::from_secs(15));

        scheduler.advance_time_by(Duration::from_secs(10));
        assert_eq!(*log.lock().unwrap(), vec!["t10", "t20"]);

        scheduler.advance_time_by(Duration::from_secs(100));
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_simultaneous_tasks_run_in_schedule_order() {
        let scheduler = VirtualTimeScheduler::new();
        let worker = scheduler.create_worker();
        let log = Arc::new(Mutex::new(Vec::new()));

        worker.schedule(push(&log, "first"), Duration::ZERO);
        worker.schedule(push(&log, "second"), Duration::ZERO);
        worker.schedule(push(&log, "third"), Duration::ZERO);

        scheduler.trigger_due_tasks();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_task_scheduling_follow_up_runs_in_same_advance() {
        let scheduler = VirtualTimeScheduler::new();
        let worker = scheduler.create_worker();
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner_worker = worker.clone();
        let inner_log = log.clone();
        worker.schedule(
            Box::new(move || {
                inner_log.lock().unwrap().push("outer");
                inner_worker.schedule(push(&inner_log, "inner"), Duration::from_secs(1));
            }),
            Duration::from_secs(1),
        );

        scheduler.advance_time_by(Duration::from_secs(2));
        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_worker_dispose_cancels_pending() {
        let scheduler = VirtualTimeScheduler::new();
        let worker = scheduler.create_worker();
        let log = Arc::new(Mutex::new(Vec::new()));

        worker.schedule(push(&log, "a"), Duration::from_secs(1));
        worker.schedule(push(&log, "b"), Duration::from_secs(2));
        worker.dispose();
        let late = worker.schedule(push(&log, "c"), Duration::from_secs(1));

        scheduler.advance_time_by(Duration::from_secs(5));
        assert!(log.lock().unwrap().is_empty());
        assert!(late.is_disposed());
    }

    #[test]
    fn test_cancel_handle_skips_task() {
        let scheduler = VirtualTimeScheduler::new();
        let worker = scheduler.create_worker();
        let log = Arc::new(Mutex::new(Vec::new()));

        let handle = worker.schedule(push(&log, "cancelled"), Duration::from_secs(1));
        worker.schedule(push(&log, "kept"), Duration::from_secs(1));
        handle.dispose();

        scheduler.advance_time_by(Duration::from_secs(1));
        assert_eq!(*log.lock().unwrap(), vec!["kept"]);
    }

    #[test]
    fn test_panicking_task_does_not_stop_lane() {
        let scheduler = VirtualTimeScheduler::new();
        let worker = scheduler.create_worker();
        let log = Arc::new(Mutex::new(Vec::new()));

        worker.schedule(Box::new(|| panic!("task failure")), Duration::ZERO);
        worker.schedule(push(&log, "after"), Duration::ZERO);

        scheduler.trigger_due_tasks();
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }
}
