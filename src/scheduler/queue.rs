// Copyright (c) 2025 - Cowboy AI, Inc.
//! Timed task queue shared by every worker implementation.
//!
//! Ordered by due time, ties broken by submission order, so a lane draining
//! it is FIFO for tasks scheduled at the same instant.

use super::Task;
use crate::subscription::Subscription;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

pub(crate) struct ScheduledTask {
    pub(crate) due: Duration,
    seq: u64,
    pub(crate) task: Task,
    pub(crate) handle: Subscription,
    owner: Option<Subscription>,
}

impl ScheduledTask {
    /// Cancelled by its own handle or by the worker that owns it
    pub(crate) fn is_cancelled(&self) -> bool {
        self.handle.is_disposed()
            || self
                .owner
                .as_ref()
                .map_or(false, |owner| owner.is_disposed())
    }
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    // reversed: BinaryHeap is a max-heap
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
pub(crate) struct TimedQueue {
    heap: BinaryHeap<ScheduledTask>,
    next_seq: u64,
}

impl TimedQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(
        &mut self,
        due: Duration,
        task: Task,
        handle: Subscription,
        owner: Option<Subscription>,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(ScheduledTask {
            due,
            seq,
            task,
            handle,
            owner,
        });
    }

    pub(crate) fn peek_due(&self) -> Option<Duration> {
        self.heap.peek().map(|task| task.due)
    }

    /// Pop the earliest task if it is due at `now`
    pub(crate) fn pop_due(&mut self, now: Duration) -> Option<ScheduledTask> {
        match self.heap.peek() {
            Some(task) if task.due <= now => self.heap.pop(),
            _ => None,
        }
    }

    /// Pop the earliest task regardless of due time
    pub(crate) fn pop(&mut self) -> Option<ScheduledTask> {
        self.heap.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }
}
