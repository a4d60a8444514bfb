//! Lifecycle events emitted by managers and the background worker.
//!
//! Implement [`EventHandler`] to observe flushes, task execution, and state
//! changes for logging, metrics, or UI updates.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or silent runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` (the default) |
//! | [`FnEventHandler`] | Quick closures |

use crate::worker::TaskKind;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Events emitted while maintaining a conversation's context.
#[derive(Debug)]
pub enum ContextEvent<'a> {
    /// An overflowing raw tail was handed off for tier-1 summarization.
    TailFlushed {
        conversation_id: &'a str,
        chars: usize,
        interactions: usize,
        chunks: usize,
    },
    /// A task entered the queue.
    TaskQueued {
        task_id: &'a str,
        kind: TaskKind,
        priority: i32,
    },
    /// The worker picked up a task.
    TaskStarted { task_id: &'a str, kind: TaskKind },
    /// A summarization call succeeded.
    TaskSucceeded {
        task_id: &'a str,
        kind: TaskKind,
        processing_time: Duration,
        compression_ratio: f64,
    },
    /// A summarization call failed and the task was dropped.
    TaskFailed {
        task_id: &'a str,
        kind: TaskKind,
        error: &'a str,
    },
    /// A tier-1 chunk was appended.
    ChunkAdded {
        conversation_id: &'a str,
        chunk_id: &'a str,
        l1_count: usize,
    },
    /// Tier-1 chunks were folded into the cumulative digest.
    BlockFolded {
        conversation_id: &'a str,
        block_id: &'a str,
        folded_chunks: usize,
        digest_chars: usize,
    },
    /// Persisting the state failed; memory remains authoritative.
    StateSaveFailed {
        conversation_id: &'a str,
        error: &'a str,
    },
}

/// Observer for [`ContextEvent`]s. Called synchronously on the emitting
/// thread, so implementations must be cheap.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &ContextEvent<'_>);
}

/// Ignores all events.
pub struct NoopHandler;

impl EventHandler for NoopHandler {
    fn on_event(&self, _event: &ContextEvent<'_>) {}
}

/// Logs every event through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &ContextEvent<'_>) {
        match event {
            ContextEvent::TailFlushed {
                conversation_id,
                chars,
                interactions,
                chunks,
            } => info!(
                "[{conversation_id}] raw tail flushed: {chars} chars, {interactions} interaction(s) in {chunks} chunk(s)"
            ),
            ContextEvent::TaskQueued {
                task_id,
                kind,
                priority,
            } => debug!("Queued {kind} task {task_id} (priority {priority})"),
            ContextEvent::TaskStarted { task_id, kind } => {
                debug!("Running {kind} task {task_id}")
            }
            ContextEvent::TaskSucceeded {
                task_id,
                kind,
                processing_time,
                compression_ratio,
            } => info!(
                "{kind} task {task_id} done in {:.2}s (compression {compression_ratio:.1}x)",
                processing_time.as_secs_f64()
            ),
            ContextEvent::TaskFailed {
                task_id,
                kind,
                error,
            } => warn!("{kind} task {task_id} failed: {error}"),
            ContextEvent::ChunkAdded {
                conversation_id,
                chunk_id,
                l1_count,
            } => debug!("[{conversation_id}] tier-1 chunk {chunk_id} added ({l1_count} total)"),
            ContextEvent::BlockFolded {
                conversation_id,
                block_id,
                folded_chunks,
                digest_chars,
            } => info!(
                "[{conversation_id}] folded {folded_chunks} chunk(s) into block {block_id}, digest now {digest_chars} chars"
            ),
            ContextEvent::StateSaveFailed {
                conversation_id,
                error,
            } => warn!("[{conversation_id}] failed to save context state: {error}"),
        }
    }
}

/// Adapts a closure into an [`EventHandler`].
pub struct FnEventHandler<F>
where
    F: Fn(&ContextEvent<'_>) + Send + Sync,
{
    f: F,
}

impl<F> FnEventHandler<F>
where
    F: Fn(&ContextEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&ContextEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &ContextEvent<'_>) {
        (self.f)(event)
    }
}
