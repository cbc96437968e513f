// Copyright (c) 2025 - Cowboy AI, Inc.
//! Current-thread trampoline.
//!
//! Tasks run on the thread that scheduled them. A task scheduled while
//! another task of the same worker is running is queued and run after it,
//! never recursively, which keeps the stack flat for self-rescheduling work.

use super::queue::TimedQueue;
use super::{run_task, CancelHandle, Scheduler, Task, Worker, WorkerRef};
use crate::subscription::Subscription;
use crate::sync::lock;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Scheduler running work on the caller's thread
#[derive(Debug, Clone)]
pub struct CurrentThreadScheduler {
    epoch: Instant,
}

impl CurrentThreadScheduler {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for CurrentThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for CurrentThreadScheduler {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn create_worker(&self) -> WorkerRef {
        Arc::new(TrampolineWorker {
            epoch: self.epoch,
            state: Mutex::new(Trampoline {
                queue: TimedQueue::new(),
                draining: false,
            }),
            lifetime: Subscription::new(),
        })
    }
}

struct TrampolineWorker {
    epoch: Instant,
    state: Mutex<Trampoline>,
    lifetime: Subscription,
}

struct Trampoline {
    queue: TimedQueue,
    draining: bool,
}

impl TrampolineWorker {
    fn drain(&self) {
        loop {
            let next = {
                let mut state = lock(&self.state);
                if self.lifetime.is_disposed() {
                    state.queue.clear();
                }
                match state.queue.pop() {
                    Some(task) => task,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            let wait = next.due.saturating_sub(self.epoch.elapsed());
            if !wait.is_zero() {
                thread::sleep(wait);
            }
            if !next.is_cancelled() {
                let _ = run_task(next.task);
            }
        }
    }
}

impl Worker for TrampolineWorker {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn schedule(&self, task: Task, delay: Duration) -> CancelHandle {
        if self.lifetime.is_disposed() {
            return Subscription::disposed();
        }
        let handle = Subscription::new();
        {
            let mut state = lock(&self.state);
            let due = self.epoch.elapsed() + delay;
            state
                .queue
                .push(due, task, handle.clone(), Some(self.lifetime.clone()));
            if state.draining {
                return handle;
            }
            state.draining = true;
        }
        self.drain();
        handle
    }

    fn dispose(&self) {
        self.lifetime.dispose();
        lock(&self.state).queue.clear();
    }

    fn is_disposed(&self) -> bool {
        self.lifetime.is_disposed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_nested_schedule_is_queued_not_recursive() {
        let scheduler = CurrentThreadScheduler::new();
        let worker = scheduler.create_worker();
        let log = Arc::new(Mutex::new(Vec::new()));

        let nested_worker = worker.clone();
        let outer_log = log.clone();
        worker.schedule(
            Box::new(move || {
                outer_log.lock().unwrap().push("outer start");
                let inner_log = outer_log.clone();
                nested_worker.schedule(
                    Box::new(move || inner_log.lock().unwrap().push("inner")),
                    Duration::ZERO,
                );
                outer_log.lock().unwrap().push("outer end");
            }),
            Duration::ZERO,
        );

        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer start", "outer end", "inner"]
        );
    }

    #[test]
    fn test_delayed_task_waits() {
        let scheduler = CurrentThreadScheduler::new();
        let worker = scheduler.create_worker();
        let started = Instant::now();
        worker.schedule(Box::new(|| {}), Duration::from_millis(20));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_disposed_worker_rejects_tasks() {
        let worker = CurrentThreadScheduler::new().create_worker();
        worker.dispose();
        let handle = worker.schedule(Box::new(|| panic!("must not run")), Duration::ZERO);
        assert!(handle.is_disposed());
    }
}
