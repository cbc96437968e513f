// Copyright (c) 2025 - Cowboy AI, Inc.
//! Dedicated-thread lanes.
//!
//! Every worker owns one OS thread that drains its timed queue. All tasks of
//! a worker therefore run on the same thread, one after another, which is the
//! single-lane background guarantee operators rely on after `observe_on`.

use super::queue::TimedQueue;
use super::{run_task, CancelHandle, Scheduler, Task, Worker, WorkerRef};
use crate::config::RuntimeConfig;
use crate::subscription::Subscription;
use crate::sync::lock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Scheduler creating one thread per worker
#[derive(Debug)]
pub struct LaneScheduler {
    epoch: Instant,
    prefix: String,
    spawned: AtomicUsize,
}

impl LaneScheduler {
    /// Create a lane scheduler naming threads `<prefix>-<n>`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            epoch: Instant::now(),
            prefix: prefix.into(),
            spawned: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.lane_prefix.clone())
    }
}

impl Default for LaneScheduler {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}

impl Scheduler for LaneScheduler {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn create_worker(&self) -> WorkerRef {
        let index = self.spawned.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", self.prefix, index);
        let shared = Arc::new(LaneShared {
            epoch: self.epoch,
            state: Mutex::new(LaneState {
                queue: TimedQueue::new(),
                disposed: false,
            }),
            wakeup: Condvar::new(),
        });
        let lifetime = Subscription::new();

        let lane = shared.clone();
        let lane_name = name.clone();
        let spawned = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_lane(&lane, &lane_name));
        if let Err(err) = spawned {
            error!(lane = %name, error = %err, "failed to spawn lane thread");
            lifetime.dispose();
            lock(&shared.state).disposed = true;
        }

        Arc::new(LaneWorker {
            shared,
            lifetime,
            name,
        })
    }
}

struct LaneShared {
    epoch: Instant,
    state: Mutex<LaneState>,
    wakeup: Condvar,
}

struct LaneState {
    queue: TimedQueue,
    disposed: bool,
}

fn run_lane(shared: &LaneShared, name: &str) {
    debug!(lane = %name, "lane started");
    let mut state = lock(&shared.state);
    loop {
        if state.disposed {
            break;
        }
        let now = shared.epoch.elapsed();
        match state.queue.peek_due() {
            None => {
                state = shared
                    .wakeup
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some(due) if due > now => {
                state = shared
                    .wakeup
                    .wait_timeout(state, due - now)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|poisoned| poisoned.into_inner().0);
            }
            Some(_) => {
                if let Some(task) = state.queue.pop_due(now) {
                    drop(state);
                    if !task.is_cancelled() {
                        let _ = run_task(task.task);
                    }
                    state = lock(&shared.state);
                }
            }
        }
    }
    debug!(lane = %name, "lane stopped");
}

struct LaneWorker {
    shared: Arc<LaneShared>,
    lifetime: Subscription,
    name: String,
}

impl Worker for LaneWorker {
    fn now(&self) -> Duration {
        self.shared.epoch.elapsed()
    }

    fn schedule(&self, task: Task, delay: Duration) -> CancelHandle {
        let handle = Subscription::new();
        {
            let mut state = lock(&self.shared.state);
            if state.disposed {
                return Subscription::disposed();
            }
            let due = self.shared.epoch.elapsed() + delay;
            state.queue.push(due, task, handle.clone(), None);
        }
        self.shared.wakeup.notify_one();
        handle
    }

    fn dispose(&self) {
        if self.lifetime.is_disposed() {
            return;
        }
        self.lifetime.dispose();
        {
            let mut state = lock(&self.shared.state);
            state.disposed = true;
            state.queue.clear();
        }
        self.shared.wakeup.notify_all();
        debug!(lane = %self.name, "lane disposed");
    }

    fn is_disposed(&self) -> bool {
        self.lifetime.is_disposed()
    }
}

impl Drop for LaneWorker {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_tasks_share_one_thread_in_order() {
        let scheduler = LaneScheduler::new("test-lane");
        let worker = scheduler.create_worker();
        let (tx, rx) = mpsc::channel();

        for i in 0..5 {
            let tx = tx.clone();
            worker.schedule(
                Box::new(move || {
                    let name = thread::current().name().map(str::to_string);
                    tx.send((i, name)).unwrap();
                }),
                Duration::ZERO,
            );
        }

        let seen: Vec<_> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(seen
            .iter()
            .all(|(_, name)| name.as_deref() == Some("test-lane-0")));
        worker.dispose();
    }

    #[test]
    fn test_delayed_tasks_run_by_due_time() {
        let worker = LaneScheduler::new("delay-lane").create_worker();
        let (tx, rx) = mpsc::channel();

        let late = tx.clone();
        worker.schedule(Box::new(move || late.send("late").unwrap()), Duration::from_millis(40));
        worker.schedule(Box::new(move || tx.send("early").unwrap()), Duration::from_millis(5));

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "early");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "late");
        worker.dispose();
    }

    #[test]
    fn test_dispose_cancels_pending() {
        let worker = LaneScheduler::new("cancel-lane").create_worker();
        let (tx, rx) = mpsc::channel::<()>();
        worker.schedule(Box::new(move || tx.send(()).unwrap()), Duration::from_millis(200));
        worker.dispose();
        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
        assert!(worker.is_disposed());
    }

    #[test]
    fn test_panic_keeps_lane_alive() {
        let worker = LaneScheduler::new("panic-lane").create_worker();
        let (tx, rx) = mpsc::channel();
        worker.schedule(Box::new(|| panic!("lane task failure")), Duration::ZERO);
        worker.schedule(Box::new(move || tx.send("survived").unwrap()), Duration::ZERO);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "survived");
        worker.dispose();
    }
}
