//! Keyed lifetime of context managers, and dispatch of worker outcomes.

use crate::config::ContextConfig;
use crate::context::history::{Conversation, ConversationHistory};
use crate::context::manager::ContextManager;
use crate::events::{EventHandler, LoggingHandler};
use crate::summarize::SummarizerSet;
use crate::worker::{CompletionSink, SummaryTask, TaskOutcome, TaskQueue, Worker, WorkerHandle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

/// Owns one [`ContextManager`] per conversation and the queue they share.
///
/// The registry is also the worker's [`CompletionSink`]: outcomes are routed
/// to the manager of the task's conversation. Tasks of a conversation removed
/// in the meantime are skipped before summarization, and so are tasks planned
/// by an earlier manager of a re-created conversation.
pub struct ContextRegistry {
    config: ContextConfig,
    queue: Arc<TaskQueue>,
    events: Arc<dyn EventHandler>,
    managers: Mutex<HashMap<String, Arc<ContextManager>>>,
    worker_spawned: AtomicBool,
}

impl ContextRegistry {
    /// Registry that logs events through `tracing`.
    pub fn new(config: ContextConfig) -> Arc<Self> {
        Self::with_events(config, Arc::new(LoggingHandler))
    }

    pub fn with_events(config: ContextConfig, events: Arc<dyn EventHandler>) -> Arc<Self> {
        Arc::new(Self {
            config,
            queue: Arc::new(TaskQueue::new()),
            events,
            managers: Mutex::new(HashMap::new()),
            worker_spawned: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    fn managers(&self) -> MutexGuard<'_, HashMap<String, Arc<ContextManager>>> {
        self.managers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The manager for `conversation`, created (and its state loaded) on
    /// first use.
    pub fn get_or_create(
        &self,
        conversation: &Conversation,
        history: Arc<dyn ConversationHistory>,
    ) -> Arc<ContextManager> {
        let mut managers = self.managers();
        if let Some(manager) = managers.get(&conversation.id) {
            return Arc::clone(manager);
        }
        let manager = Arc::new(ContextManager::new(
            conversation.clone(),
            history,
            &self.config,
            Arc::clone(&self.queue),
            Arc::clone(&self.events),
        ));
        debug!("Created context manager for {}", conversation.id);
        managers.insert(conversation.id.clone(), Arc::clone(&manager));
        manager
    }

    pub fn get(&self, conversation_id: &str) -> Option<Arc<ContextManager>> {
        self.managers().get(conversation_id).cloned()
    }

    /// Save the conversation's final state and release its manager. Tasks
    /// still queued for it are dropped when they complete.
    pub fn remove(&self, conversation_id: &str) -> bool {
        let Some(manager) = self.managers().remove(conversation_id) else {
            return false;
        };
        if let Err(e) = manager.save() {
            warn!("[{conversation_id}] failed to save context on removal: {e}");
        }
        info!("Removed context manager for {conversation_id}");
        true
    }

    pub fn conversation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.managers().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.managers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start the background worker for this registry's queue.
    ///
    /// Only one worker may ever be spawned per registry. Must be called from
    /// within a tokio runtime.
    pub fn spawn_worker(self: &Arc<Self>, summarizers: SummarizerSet) -> Result<WorkerHandle, String> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| format!("spawn_worker requires a tokio runtime: {e}"))?;
        if self.worker_spawned.swap(true, Ordering::SeqCst) {
            return Err("a summarization worker is already running for this registry".into());
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let sink: Weak<dyn CompletionSink> = weak;
        Ok(Worker::spawn(
            Arc::clone(&self.queue),
            summarizers,
            sink,
            &self.config.performance,
            self.config.retry.clone(),
            Arc::clone(&self.events),
        ))
    }
}

impl CompletionSink for ContextRegistry {
    fn accepts(&self, task: &SummaryTask) -> bool {
        self.get(&task.conversation_id)
            .is_some_and(|manager| manager.owns(task))
    }

    fn deliver(&self, outcome: TaskOutcome) {
        match self.get(outcome.conversation_id()) {
            Some(manager) => manager.apply_outcome(outcome),
            None => debug!(
                "Dropping outcome for removed conversation {}",
                outcome.conversation_id()
            ),
        }
    }
}
