//! Shared priority queue of summarization jobs.
//!
//! Ordering: higher `priority` first, ties broken by insertion order (FIFO).
//! The queue also tracks unfinished work: every enqueued task counts until
//! the consumer calls [`TaskQueue::mark_done`], and [`TaskQueue::wait_idle`]
//! resolves once that count reaches zero.

use super::task::SummaryTask;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

struct QueuedTask {
    sequence: u64,
    task: SummaryTask,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    // BinaryHeap is a max-heap: greater pops first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Multi-producer priority queue consumed by the background worker.
#[derive(Default)]
pub struct TaskQueue {
    heap: Mutex<BinaryHeap<QueuedTask>>,
    next_sequence: AtomicU64,
    unfinished: AtomicUsize,
    available: Notify,
    idle: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task and wake the consumer.
    pub fn enqueue(&self, task: SummaryTask) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        self.unfinished.fetch_add(1, Ordering::SeqCst);
        self.heap
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(QueuedTask { sequence, task });
        self.available.notify_one();
    }

    /// Pop the highest-priority task without waiting.
    pub fn try_dequeue(&self) -> Option<SummaryTask> {
        self.heap
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .map(|queued| queued.task)
    }

    /// Pop the highest-priority task, waiting at most `timeout` for one to
    /// arrive. Returns `None` on timeout.
    pub async fn dequeue(&self, timeout: Duration) -> Option<SummaryTask> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(task) = self.try_dequeue() {
                return Some(task);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            if tokio::time::timeout(remaining, self.available.notified())
                .await
                .is_err()
            {
                return self.try_dequeue();
            }
        }
    }

    /// Record that a dequeued task has been fully handled.
    pub fn mark_done(&self) {
        let previous = self
            .unfinished
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.idle.notify_waiters();
        }
    }

    /// Tasks waiting to be dequeued.
    pub fn len(&self) -> usize {
        self.heap.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tasks enqueued but not yet marked done.
    pub fn unfinished(&self) -> usize {
        self.unfinished.load(Ordering::SeqCst)
    }

    /// Resolve once every enqueued task has been marked done.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.unfinished() == 0 {
                return;
            }
            notified.await;
        }
    }
}
