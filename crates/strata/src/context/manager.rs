//! Per-conversation orchestration of the context tiers.
//!
//! A [`ContextManager`] owns one conversation's [`ContextState`] behind a
//! mutex. Mutations happen in two places:
//!
//! - **Caller side**: [`add_interaction`](ContextManager::add_interaction)
//!   appends to the raw tail, or hands an already-overflowing tail off as
//!   tier-1 tasks and restarts the tail with the new exchange.
//! - **Worker side**: [`apply_outcome`](ContextManager::apply_outcome) lands a
//!   tier-1 chunk or folds a tier-2 block into the cumulative digest.
//!
//! Completion handlers never enqueue while holding the lock. They mutate the
//! state and return the follow-up task (if any), which is enqueued after the
//! lock is released.
//!
//! Every task carries the generation of the manager that planned it.
//! Outcomes from another generation (a manager that was removed and
//! re-created for the same conversation) are discarded.
//!
//! Overflow is checked against the tail as it was *before* the current
//! exchange, so the tail may exceed its limit by one interaction until the
//! next call flushes it.

use crate::config::{ChunkingConfig, ContextConfig, TierParams};
use crate::context::builder::build_context;
use crate::context::history::{Conversation, ConversationHistory, latest_exchange_indices};
use crate::context::interaction::{
    Interaction, chunk_text, collect_message_indices, group_into_chunks, parse_interactions,
    truncate_chars,
};
use crate::context::policy::TriggerPolicy;
use crate::context::state::{
    ContextState, ContextStats, SummaryBlock, SummaryChunk, Thresholds, char_len,
};
use crate::context::store::StateStore;
use crate::events::{ContextEvent, EventHandler};
use crate::worker::{SummaryTask, TaskKind, TaskOutcome, TaskPayload, TaskQueue};
use chrono::Local;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Separator between tier-1 summaries in a tier-2 job's input.
pub const TIER2_JOIN: &str = "\n---\n";

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

struct Inner {
    state: ContextState,
    /// A tier-2 job for this conversation is queued or running.
    tier2_in_flight: bool,
}

/// Tail text handed off for tier-1 summarization.
struct Flush {
    text: String,
    indices: Vec<Vec<usize>>,
}

/// Orchestrates one conversation's context.
pub struct ContextManager {
    conversation: Conversation,
    generation: u64,
    enabled: bool,
    policy: TriggerPolicy,
    chunking: ChunkingConfig,
    params: TierParams,
    l1_priority: i32,
    l2_priority: i32,
    history: Arc<dyn ConversationHistory>,
    queue: Arc<TaskQueue>,
    events: Arc<dyn EventHandler>,
    store: Option<StateStore>,
    inner: Mutex<Inner>,
}

impl ContextManager {
    /// Create a manager, loading persisted state if present.
    ///
    /// Thresholds from `config` override those stored in the document. A
    /// document that fails to load is logged and replaced by fresh state.
    /// If the loaded state already holds enough tier-1 chunks, a fold is
    /// scheduled immediately.
    pub fn new(
        conversation: Conversation,
        history: Arc<dyn ConversationHistory>,
        config: &ContextConfig,
        queue: Arc<TaskQueue>,
        events: Arc<dyn EventHandler>,
    ) -> Self {
        let policy = TriggerPolicy::from_config(config);
        let thresholds = Thresholds {
            l2_trigger_count: policy.l2_trigger_count,
            l2_preserve_ratio: policy.l2_preserve_ratio,
        };
        let store = config
            .enabled
            .then(|| StateStore::new(&config.save_dir, &conversation));

        let loaded = match store.as_ref().map(StateStore::load) {
            Some(Ok(Some(state))) => {
                info!(
                    "[{}] loaded context: {} tier-1 chunk(s), {} tier-2 block(s)",
                    conversation.id,
                    state.l1_chunks.len(),
                    state.l2_blocks.len()
                );
                Some(state)
            }
            Some(Err(e)) => {
                warn!("[{}] starting with fresh context: {e}", conversation.id);
                None
            }
            _ => None,
        };
        let mut state = loaded
            .unwrap_or_else(|| ContextState::new(policy.raw_tail_char_limit, thresholds.clone()));
        state.raw_tail_char_limit = policy.raw_tail_char_limit;
        state.thresholds = thresholds;

        let manager = Self {
            conversation,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            enabled: config.enabled,
            policy,
            chunking: config.l1_chunks.clone(),
            params: config.summarization_params.clone(),
            l1_priority: config.summarization.l1_priority,
            l2_priority: config.summarization.l2_priority,
            history,
            queue,
            events,
            store,
            inner: Mutex::new(Inner {
                state,
                tier2_in_flight: false,
            }),
        };

        if manager.enabled {
            let pending = manager.plan_tier2(&mut manager.lock());
            manager.enqueue_all(pending);
        }
        manager
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation.id
    }

    /// Unique per manager instance; stamped on every task it plans.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `task` was planned by this manager instance.
    pub fn owns(&self, task: &SummaryTask) -> bool {
        task.generation == self.generation && task.conversation_id == self.conversation.id
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Caller side ────────────────────────────────────────────────

    /// Record one completed exchange.
    ///
    /// If the tail was already over its limit, the whole tail is scheduled
    /// for tier-1 summarization and the tail restarts with this exchange.
    /// Otherwise the exchange is appended. The state is persisted either way.
    pub fn add_interaction(&self, user: &str, assistant: &str) {
        if !self.enabled {
            return;
        }

        let indices = latest_exchange_indices(&self.history.roles());
        let entry = Interaction::new(user, assistant).tail_text();
        let entry_chars = char_len(&entry);

        let flush = {
            let mut inner = self.lock();
            let state = &mut inner.state;
            let flush = if self.policy.should_flush_tail(&state.raw_tail) {
                Some(Flush {
                    text: std::mem::replace(&mut state.raw_tail, entry),
                    indices: std::mem::replace(&mut state.raw_tail_indices, vec![indices]),
                })
            } else {
                state.raw_tail.push_str(&entry);
                state.raw_tail_indices.push(indices);
                None
            };
            state.counters.total_interactions += 1;
            state.counters.total_characters_processed += entry_chars as u64;
            debug!(
                "[{}] raw tail at {}/{} chars",
                self.conversation.id,
                char_len(&state.raw_tail),
                state.raw_tail_char_limit
            );
            self.persist(&inner.state);
            flush
        };

        if let Some(flush) = flush {
            self.flush_to_tier1(flush);
        }
    }

    /// Parse a flushed tail, group it, and enqueue one tier-1 task per chunk.
    fn flush_to_tier1(&self, flush: Flush) {
        let mut interactions = parse_interactions(&flush.text);
        if interactions.is_empty() {
            warn!(
                "[{}] no interactions found in flushed tail ({} chars)",
                self.conversation.id,
                char_len(&flush.text)
            );
            return;
        }
        if interactions.len() == flush.indices.len() {
            for (interaction, indices) in interactions.iter_mut().zip(flush.indices) {
                interaction.message_indices = indices;
            }
        } else {
            debug!(
                "[{}] parsed {} interaction(s) but tracked {}, dropping message indices",
                self.conversation.id,
                interactions.len(),
                flush.indices.len()
            );
        }

        let count = interactions.len();
        let chunks = group_into_chunks(interactions, self.chunking.target_char_limit);
        self.events.on_event(&ContextEvent::TailFlushed {
            conversation_id: &self.conversation.id,
            chars: char_len(&flush.text),
            interactions: count,
            chunks: chunks.len(),
        });

        let tasks = chunks
            .iter()
            .map(|chunk| {
                let mut text = chunk_text(chunk);
                if chunk.len() == 1
                    && !self.chunking.allow_single_interaction_overflow
                    && char_len(&text) > self.chunking.max_char_limit
                {
                    text = truncate_chars(&text, self.chunking.max_char_limit);
                }
                SummaryTask::new(
                    self.conversation.id.clone(),
                    TaskPayload::Tier1 {
                        text,
                        message_indices: collect_message_indices(chunk),
                    },
                    self.l1_priority,
                )
                .with_params(self.params.l1.clone())
                .with_generation(self.generation)
            })
            .collect();
        self.enqueue_all(tasks);
    }

    /// Assemble the context for the next generation call.
    pub fn context_for_generation(&self) -> String {
        if !self.enabled {
            return String::new();
        }
        let history_len = self.history.len();
        build_context(&self.lock().state, history_len)
    }

    // ── Worker side ────────────────────────────────────────────────

    /// Land the result of a summarization task.
    pub fn apply_outcome(&self, outcome: TaskOutcome) {
        if !self.enabled {
            return;
        }
        if outcome.generation() != self.generation {
            debug!(
                "[{}] discarding outcome of generation {} (current {})",
                self.conversation.id,
                outcome.generation(),
                self.generation
            );
            return;
        }
        let follow_up = match outcome {
            TaskOutcome::Tier1Done {
                summary,
                original_text,
                message_indices,
                ..
            } => self.on_tier1_complete(summary, &original_text, message_indices),
            TaskOutcome::Tier2Done {
                summary,
                chunk_ids,
                original_chars,
                ..
            } => self.on_tier2_complete(summary, chunk_ids, original_chars),
            TaskOutcome::Failed {
                kind,
                task_id,
                error,
                ..
            } => {
                debug!(
                    "[{}] {kind} task {task_id} lost: {error}",
                    self.conversation.id
                );
                if kind == TaskKind::Tier2 {
                    self.lock().tier2_in_flight = false;
                }
                Vec::new()
            }
        };
        self.enqueue_all(follow_up);
    }

    fn on_tier1_complete(
        &self,
        summary: String,
        original_text: &str,
        message_indices: Vec<usize>,
    ) -> Vec<SummaryTask> {
        let mut inner = self.lock();
        let chunk = SummaryChunk::from_summary(summary, char_len(original_text), message_indices);
        let chunk_id = chunk.id.clone();
        inner.state.l1_chunks.push(chunk);
        inner.state.counters.total_summarizations_l1 += 1;
        inner.state.last_summarization_time = Some(Local::now());
        self.persist(&inner.state);

        self.events.on_event(&ContextEvent::ChunkAdded {
            conversation_id: &self.conversation.id,
            chunk_id: &chunk_id,
            l1_count: inner.state.l1_chunks.len(),
        });
        self.plan_tier2(&mut inner)
    }

    fn on_tier2_complete(
        &self,
        summary: String,
        chunk_ids: Vec<String>,
        original_chars: usize,
    ) -> Vec<SummaryTask> {
        let mut inner = self.lock();
        inner.tier2_in_flight = false;

        let present = chunk_ids
            .iter()
            .filter(|id| inner.state.l1_chunks.iter().any(|c| &c.id == *id))
            .count();
        if present == 0 {
            warn!(
                "[{}] discarding tier-2 summary: none of its {} chunk(s) remain",
                self.conversation.id,
                chunk_ids.len()
            );
            return self.plan_tier2(&mut inner);
        }

        let block = SummaryBlock::from_summary(chunk_ids, summary, original_chars);
        let state = &mut inner.state;
        state.cumulative_digest.add_block(&block);
        let folded = state.remove_chunks(&block.l1_chunk_ids);
        if folded != block.l1_chunk_ids.len() {
            warn!(
                "[{}] block {} folded {folded} of {} expected chunk(s)",
                self.conversation.id,
                block.id,
                block.l1_chunk_ids.len()
            );
        }
        self.events.on_event(&ContextEvent::BlockFolded {
            conversation_id: &self.conversation.id,
            block_id: &block.id,
            folded_chunks: folded,
            digest_chars: state.cumulative_digest.total_chars,
        });
        state.l2_blocks.push(block);
        state.counters.total_summarizations_l2 += 1;
        state.last_summarization_time = Some(Local::now());
        self.persist(&inner.state);

        self.plan_tier2(&mut inner)
    }

    /// Build a tier-2 task over the oldest chunks if the fold threshold is
    /// reached and none is in flight.
    fn plan_tier2(&self, inner: &mut Inner) -> Vec<SummaryTask> {
        if inner.tier2_in_flight || !self.policy.should_fold_to_tier2(inner.state.l1_chunks.len()) {
            return Vec::new();
        }
        let n = inner.state.fold_prefix_len(self.policy.l2_preserve_ratio);
        if n == 0 {
            return Vec::new();
        }
        let prefix = inner.state.l1_chunks.iter().take(n);
        let text = prefix
            .clone()
            .map(|c| c.summary.as_str())
            .collect::<Vec<_>>()
            .join(TIER2_JOIN);
        let original_chars = prefix.clone().map(|c| c.original_char_count).sum();
        let chunk_ids = prefix.map(|c| c.id.clone()).collect();

        inner.tier2_in_flight = true;
        vec![
            SummaryTask::new(
                self.conversation.id.clone(),
                TaskPayload::Tier2 {
                    text,
                    chunk_ids,
                    original_chars,
                },
                self.l2_priority,
            )
            .with_params(self.params.l2.clone())
            .with_generation(self.generation),
        ]
    }

    fn enqueue_all(&self, tasks: Vec<SummaryTask>) {
        for task in tasks {
            self.events.on_event(&ContextEvent::TaskQueued {
                task_id: &task.id,
                kind: task.kind(),
                priority: task.priority,
            });
            self.queue.enqueue(task);
        }
    }

    // ── Persistence and inspection ─────────────────────────────────

    fn persist(&self, state: &ContextState) {
        if let Err(e) = self.save_state(state) {
            self.events.on_event(&ContextEvent::StateSaveFailed {
                conversation_id: &self.conversation.id,
                error: &e,
            });
        }
    }

    fn save_state(&self, state: &ContextState) -> Result<(), String> {
        match &self.store {
            Some(store) => store.save(state),
            None => Ok(()),
        }
    }

    /// Persist the current state. A no-op when disabled.
    pub fn save(&self) -> Result<(), String> {
        self.save_state(&self.lock().state)
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> ContextState {
        self.lock().state.clone()
    }

    pub fn stats(&self) -> ContextStats {
        self.lock().state.stats()
    }

    /// Whether a tier-2 job is queued or running for this conversation.
    pub fn tier2_in_flight(&self) -> bool {
        self.lock().tier2_in_flight
    }

    /// Where the state is persisted, if enabled.
    pub fn state_path(&self) -> Option<&std::path::Path> {
        self.store.as_ref().map(StateStore::path)
    }
}
