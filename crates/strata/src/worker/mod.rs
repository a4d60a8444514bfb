//! Background summarization worker.
//!
//! A single tokio task drains the shared [`TaskQueue`] one job at a time:
//!
//! 1. Wait (bounded by the poll interval) for the highest-priority task.
//! 2. Sleep out the remainder of the summary delay, measured from the task's
//!    creation, so a burst of flushes is not summarized mid-burst.
//! 3. Skip the task if the [`CompletionSink`] no longer accepts it.
//! 4. Run the tier's summarizer, retrying transient failures inline when a
//!    retry budget is configured.
//! 5. Deliver a [`TaskOutcome`] to the [`CompletionSink`] (normally the
//!    [`ContextRegistry`](crate::context::ContextRegistry)).
//!
//! Failed tasks are logged, counted, reported, and dropped. They are never
//! re-enqueued.

pub mod queue;
pub mod task;

pub use queue::TaskQueue;
pub use task::{SummaryTask, TaskKind, TaskOutcome, TaskPayload};

use crate::api::retry::RetryConfig;
use crate::config::WorkerConfig;
use crate::events::{ContextEvent, EventHandler};
use crate::summarize::{SummarizerSet, SummaryRequest, SummaryResult};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receives the outcome of every processed task.
pub trait CompletionSink: Send + Sync {
    /// Whether `task` still has an owner. Tasks that are refused are
    /// dropped without being summarized.
    fn accepts(&self, _task: &SummaryTask) -> bool {
        true
    }

    fn deliver(&self, outcome: TaskOutcome);
}

// ── Stats ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    successful: u64,
    failed: u64,
    processing_time: Duration,
}

/// Snapshot of worker throughput.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStats {
    pub total_tasks: u64,
    pub successful_tasks: u64,
    pub failed_tasks: u64,
    /// `successful / total`, 0 when nothing ran yet.
    pub success_rate: f64,
    /// Mean summarization time of successful tasks.
    pub avg_processing_time: Duration,
    pub queue_size: usize,
    pub running: bool,
}

// ── Worker ─────────────────────────────────────────────────────────

/// The consumer side of the task queue. Construct with [`Worker::spawn`].
pub struct Worker {
    queue: Arc<TaskQueue>,
    summarizers: SummarizerSet,
    sink: Weak<dyn CompletionSink>,
    summary_delay: Duration,
    poll_interval: Duration,
    retry: RetryConfig,
    events: Arc<dyn EventHandler>,
    counters: Arc<Mutex<Counters>>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(
        queue: Arc<TaskQueue>,
        summarizers: SummarizerSet,
        sink: Weak<dyn CompletionSink>,
        config: &WorkerConfig,
        retry: RetryConfig,
        events: Arc<dyn EventHandler>,
    ) -> WorkerHandle {
        if config.max_background_tasks != 1 {
            warn!(
                "max_background_tasks = {} is not supported, running a single worker",
                config.max_background_tasks
            );
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(Mutex::new(Counters::default()));
        let running = Arc::new(AtomicBool::new(true));

        let worker = Worker {
            queue: Arc::clone(&queue),
            summarizers,
            sink,
            summary_delay: config.summary_delay(),
            poll_interval: config.poll_interval(),
            retry,
            events,
            counters: Arc::clone(&counters),
            shutdown: shutdown_rx,
        };
        let flag = Arc::clone(&running);
        let join = tokio::spawn(async move {
            worker.run().await;
            flag.store(false, Ordering::SeqCst);
        });

        WorkerHandle {
            shutdown: shutdown_tx,
            join,
            queue,
            counters,
            running,
        }
    }

    async fn run(mut self) {
        info!("Summarization worker started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let task = tokio::select! {
                task = self.queue.dequeue(self.poll_interval) => task,
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    None
                }
            };
            let Some(task) = task else {
                continue;
            };

            self.process(task).await;
            self.queue.mark_done();
        }
        info!("Summarization worker stopped");
    }

    async fn process(&self, task: SummaryTask) {
        let wait = self.summary_delay.saturating_sub(task.age());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let accepted = self.sink.upgrade().is_some_and(|sink| sink.accepts(&task));
        if !accepted {
            debug!(
                "Skipping {} task {}: conversation {} is gone",
                task.kind(),
                task.id,
                task.conversation_id
            );
            return;
        }

        let kind = task.kind();
        self.events.on_event(&ContextEvent::TaskStarted {
            task_id: &task.id,
            kind,
        });

        let result = self.summarize_with_retry(&task).await;
        let outcome = {
            let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
            counters.total += 1;
            if result.success {
                counters.successful += 1;
                counters.processing_time += result.processing_time;
            } else {
                counters.failed += 1;
            }
            drop(counters);

            if result.success {
                self.events.on_event(&ContextEvent::TaskSucceeded {
                    task_id: &task.id,
                    kind,
                    processing_time: result.processing_time,
                    compression_ratio: result.compression_ratio,
                });
                completed(task, result.summary)
            } else {
                let error = result
                    .error
                    .unwrap_or_else(|| "unknown summarization error".to_string());
                self.events.on_event(&ContextEvent::TaskFailed {
                    task_id: &task.id,
                    kind,
                    error: &error,
                });
                TaskOutcome::Failed {
                    conversation_id: task.conversation_id,
                    generation: task.generation,
                    kind,
                    task_id: task.id,
                    error,
                }
            }
        };

        match self.sink.upgrade() {
            Some(sink) => sink.deliver(outcome),
            None => debug!(
                "Dropping outcome for conversation {}: sink is gone",
                outcome.conversation_id()
            ),
        }
    }

    async fn summarize_with_retry(&self, task: &SummaryTask) -> SummaryResult {
        let summarizer = self.summarizers.for_kind(task.kind());
        let request = SummaryRequest::new(task.payload.text()).with_params(task.params.clone());

        let mut failures = 0;
        loop {
            let result = summarizer.summarize(request.clone()).await;
            if result.success {
                return result;
            }
            failures += 1;
            let error = result.error.as_deref().unwrap_or_default();
            if !self.retry.should_retry(failures, error) {
                return result;
            }
            let delay = self.retry.delay_for_attempt(failures - 1);
            warn!(
                "{} task {} failed (attempt {failures}), retrying in {:.1}s: {error}",
                task.kind(),
                task.id,
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn completed(task: SummaryTask, summary: String) -> TaskOutcome {
    match task.payload {
        TaskPayload::Tier1 {
            text,
            message_indices,
        } => TaskOutcome::Tier1Done {
            conversation_id: task.conversation_id,
            generation: task.generation,
            summary,
            original_text: text,
            message_indices,
        },
        TaskPayload::Tier2 {
            text,
            chunk_ids,
            original_chars,
        } => TaskOutcome::Tier2Done {
            conversation_id: task.conversation_id,
            generation: task.generation,
            summary,
            original_text: text,
            chunk_ids,
            original_chars,
        },
    }
}

// ── Handle ─────────────────────────────────────────────────────────

/// Owner-side handle of a running [`Worker`].
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    queue: Arc<TaskQueue>,
    counters: Arc<Mutex<Counters>>,
    running: Arc<AtomicBool>,
}

impl WorkerHandle {
    /// Signal the worker to stop and wait for it. A task already being
    /// summarized is finished first; queued tasks are left in the queue.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            warn!("Summarization worker ended abnormally: {e}");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> WorkerStats {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let success_rate = if counters.total == 0 {
            0.0
        } else {
            counters.successful as f64 / counters.total as f64
        };
        let avg_processing_time = if counters.successful == 0 {
            Duration::ZERO
        } else {
            counters.processing_time / counters.successful as u32
        };
        WorkerStats {
            total_tasks: counters.total,
            successful_tasks: counters.successful,
            failed_tasks: counters.failed,
            success_rate,
            avg_processing_time,
            queue_size: self.queue.len(),
            running: self.is_running(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopHandler;
    use crate::summarize::FnSummarizer;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingSink {
        outcomes: Mutex<Vec<TaskOutcome>>,
        refused: Mutex<Vec<String>>,
    }

    impl CompletionSink for RecordingSink {
        fn accepts(&self, task: &SummaryTask) -> bool {
            !self.refused.lock().unwrap().contains(&task.conversation_id)
        }

        fn deliver(&self, outcome: TaskOutcome) {
            self.outcomes.lock().unwrap().push(outcome);
        }
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            summary_delay_ms: 0,
            poll_interval_ms: 10,
            max_background_tasks: 1,
        }
    }

    fn tier1(text: &str, priority: i32) -> SummaryTask {
        SummaryTask::new(
            "c1",
            TaskPayload::Tier1 {
                text: text.into(),
                message_indices: vec![0, 1],
            },
            priority,
        )
    }

    fn spawn_with(
        queue: &Arc<TaskQueue>,
        summarizers: SummarizerSet,
        sink: &Arc<RecordingSink>,
        config: &WorkerConfig,
        retry: RetryConfig,
    ) -> WorkerHandle {
        let sink: Arc<dyn CompletionSink> = sink.clone();
        Worker::spawn(
            Arc::clone(queue),
            summarizers,
            Arc::downgrade(&sink),
            config,
            retry,
            Arc::new(NoopHandler),
        )
    }

    #[tokio::test]
    async fn processes_by_priority_and_delivers_outcomes() {
        let queue = Arc::new(TaskQueue::new());
        queue.enqueue(tier1("A", 5));
        queue.enqueue(tier1("B", 1));
        queue.enqueue(tier1("C", 5));

        let sink = Arc::new(RecordingSink::default());
        let upper = Arc::new(FnSummarizer::new(|t: &str| Ok(format!("sum {t}"))));
        let handle = spawn_with(
            &queue,
            SummarizerSet::uniform(upper),
            &sink,
            &fast_config(),
            RetryConfig::default(),
        );
        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .unwrap();

        let summaries: Vec<String> = sink
            .outcomes
            .lock()
            .unwrap()
            .iter()
            .map(|o| match o {
                TaskOutcome::Tier1Done {
                    summary,
                    original_text,
                    message_indices,
                    ..
                } => {
                    assert_eq!(original_text.len(), 1);
                    assert_eq!(message_indices, &vec![0, 1]);
                    summary.clone()
                }
                other => panic!("unexpected outcome: {other:?}"),
            })
            .collect();
        assert_eq!(summaries, vec!["sum A", "sum C", "sum B"]);

        let stats = handle.stats();
        assert_eq!(stats.total_tasks, 3);
        assert_eq!(stats.successful_tasks, 3);
        assert_eq!(stats.success_rate, 1.0);
        assert_eq!(stats.queue_size, 0);
        assert!(stats.running);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn failure_is_reported_and_dropped() {
        let queue = Arc::new(TaskQueue::new());
        let sink = Arc::new(RecordingSink::default());
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let failing = Arc::new(FnSummarizer::new(move |_: &str| {
            counted.fetch_add(1, Ordering::SeqCst);
            Err("model unavailable".to_string())
        }));
        let handle = spawn_with(
            &queue,
            SummarizerSet::uniform(failing),
            &sink,
            &fast_config(),
            RetryConfig::default(),
        );

        queue.enqueue(SummaryTask::new(
            "c1",
            TaskPayload::Tier2 {
                text: "a\n---\nb".into(),
                chunk_ids: vec!["a".into(), "b".into()],
                original_chars: 10,
            },
            5,
        ));
        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let outcomes = sink.outcomes.lock().unwrap().clone();
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            TaskOutcome::Failed { kind, error, .. } => {
                assert_eq!(*kind, TaskKind::Tier2);
                assert_eq!(error, "model unavailable");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(queue.is_empty());
        let stats = handle.stats();
        assert_eq!(stats.failed_tasks, 1);
        assert_eq!(stats.success_rate, 0.0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn transient_failures_are_retried_inline() {
        let queue = Arc::new(TaskQueue::new());
        let sink = Arc::new(RecordingSink::default());
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let flaky = Arc::new(FnSummarizer::new(move |_: &str| {
            if counted.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("OpenRouter API HTTP 503 Service Unavailable: busy".to_string())
            } else {
                Ok("recovered".to_string())
            }
        }));
        let retry = RetryConfig {
            max_retries: 2,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
        };
        let handle = spawn_with(&queue, SummarizerSet::uniform(flaky), &sink, &fast_config(), retry);

        queue.enqueue(tier1("text", 1));
        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let outcomes = sink.outcomes.lock().unwrap().clone();
        assert!(matches!(
            &outcomes[..],
            [TaskOutcome::Tier1Done { summary, .. }] if summary == "recovered"
        ));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn summary_delay_is_measured_from_creation() {
        let queue = Arc::new(TaskQueue::new());
        let sink = Arc::new(RecordingSink::default());
        let config = WorkerConfig {
            summary_delay_ms: 60,
            ..fast_config()
        };
        let handle = spawn_with(
            &queue,
            SummarizerSet::uniform(Arc::new(FnSummarizer::new(|_: &str| Ok("s".to_string())))),
            &sink,
            &config,
            RetryConfig::default(),
        );

        let created = Instant::now();
        queue.enqueue(tier1("x", 1));
        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .unwrap();
        assert!(created.elapsed() >= Duration::from_millis(60));
        assert_eq!(sink.outcomes.lock().unwrap().len(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn missing_sink_skips_summarization() {
        let queue = Arc::new(TaskQueue::new());
        let sink = Arc::new(RecordingSink::default());
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let counting = Arc::new(FnSummarizer::new(move |_: &str| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok("s".to_string())
        }));
        let handle = spawn_with(
            &queue,
            SummarizerSet::uniform(counting),
            &sink,
            &fast_config(),
            RetryConfig::default(),
        );
        drop(sink);

        queue.enqueue(tier1("x", 1));
        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(handle.stats().total_tasks, 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn refused_tasks_are_not_summarized() {
        let queue = Arc::new(TaskQueue::new());
        let sink = Arc::new(RecordingSink::default());
        sink.refused.lock().unwrap().push("gone".to_string());
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let counting = Arc::new(FnSummarizer::new(move |t: &str| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(format!("sum {t}"))
        }));
        let handle = spawn_with(
            &queue,
            SummarizerSet::uniform(counting),
            &sink,
            &fast_config(),
            RetryConfig::default(),
        );

        queue.enqueue(SummaryTask::new(
            "gone",
            TaskPayload::Tier1 {
                text: "stale".into(),
                message_indices: vec![],
            },
            9,
        ));
        queue.enqueue(tier1("kept", 1));
        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let outcomes = sink.outcomes.lock().unwrap().clone();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].conversation_id(), "c1");
        assert_eq!(handle.stats().total_tasks, 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let queue = Arc::new(TaskQueue::new());
        let sink = Arc::new(RecordingSink::default());
        let config = WorkerConfig {
            poll_interval_ms: 60_000,
            ..fast_config()
        };
        let handle = spawn_with(
            &queue,
            SummarizerSet::uniform(Arc::new(FnSummarizer::new(|_: &str| Ok("s".to_string())))),
            &sink,
            &config,
            RetryConfig::default(),
        );
        assert!(handle.is_running());
        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap();
    }
}
