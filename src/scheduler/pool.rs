// Copyright (c) 2025 - Cowboy AI, Inc.
//! Tokio-backed pool scheduler.
//!
//! Workers are serial tokio tasks draining their own timed queue, so one
//! worker never runs two tasks at once, but different workers spread over the
//! runtime's thread pool. Direct tasks skip the lane entirely and may run on
//! any free runtime thread, which suits CPU-bound stages.

use super::queue::TimedQueue;
use super::{run_task, CancelHandle, Scheduler, Task, Worker, WorkerRef};
use crate::errors::{StreamError, StreamResult};
use crate::subscription::Subscription;
use crate::sync::lock;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::debug;

/// Scheduler running work on a tokio runtime
#[derive(Debug, Clone)]
pub struct PoolScheduler {
    handle: Handle,
    epoch: Instant,
}

impl PoolScheduler {
    /// Create a pool scheduler on an explicit runtime handle
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            epoch: Instant::now(),
        }
    }

    /// Create a pool scheduler on the runtime the caller is running in
    pub fn current() -> StreamResult<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| StreamError::Configuration(format!("no tokio runtime: {e}")))
    }
}

struct Scheduled {
    due: Duration,
    task: Task,
    handle: Subscription,
}

impl Scheduler for PoolScheduler {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn create_worker(&self) -> WorkerRef {
        let (tx, rx) = mpsc::unbounded_channel();
        let lifetime = Subscription::new();
        self.handle.spawn(run_lane(rx, self.epoch, lifetime.clone()));
        Arc::new(PoolWorker {
            epoch: self.epoch,
            sender: Mutex::new(Some(tx)),
            lifetime,
        })
    }

    fn schedule_direct(&self, task: Task, delay: Duration) -> CancelHandle {
        let handle = Subscription::new();
        let cancel = handle.clone();
        self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !cancel.is_disposed() {
                let _ = run_task(task);
            }
        });
        handle
    }
}

async fn run_lane(
    mut commands: mpsc::UnboundedReceiver<Scheduled>,
    epoch: Instant,
    lifetime: Subscription,
) {
    debug!(worker = %lifetime.id(), "pool lane started");
    let mut queue = TimedQueue::new();
    loop {
        let next_due = queue.peek_due();
        let deadline = tokio::time::Instant::from_std(epoch + next_due.unwrap_or(Duration::ZERO));
        tokio::select! {
            command = commands.recv() => match command {
                Some(scheduled) => queue.push(scheduled.due, scheduled.task, scheduled.handle, None),
                None => break,
            },
            _ = tokio::time::sleep_until(deadline), if next_due.is_some() => {}
        }
        if lifetime.is_disposed() {
            break;
        }
        let now = epoch.elapsed();
        while let Some(next) = queue.pop_due(now) {
            if lifetime.is_disposed() {
                break;
            }
            if !next.is_cancelled() {
                let _ = run_task(next.task);
            }
        }
    }
    debug!(worker = %lifetime.id(), pending = queue.len(), "pool lane stopped");
}

struct PoolWorker {
    epoch: Instant,
    sender: Mutex<Option<mpsc::UnboundedSender<Scheduled>>>,
    lifetime: Subscription,
}

impl Worker for PoolWorker {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn schedule(&self, task: Task, delay: Duration) -> CancelHandle {
        let handle = Subscription::new();
        let sender = lock(&self.sender);
        let Some(sender) = sender.as_ref() else {
            return Subscription::disposed();
        };
        let scheduled = Scheduled {
            due: self.epoch.elapsed() + delay,
            task,
            handle: handle.clone(),
        };
        if sender.send(scheduled).is_err() {
            return Subscription::disposed();
        }
        handle
    }

    fn dispose(&self) {
        self.lifetime.dispose();
        // closing the channel wakes the lane so it can drop its queue
        lock(&self.sender).take();
    }

    fn is_disposed(&self) -> bool {
        self.lifetime.is_disposed()
    }
}

impl Drop for PoolWorker {
    fn drop(&mut self) {
        self.dispose();
    }
}
