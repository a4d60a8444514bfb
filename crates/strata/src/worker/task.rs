//! Summarization jobs and their outcomes.

use crate::config::GenerationOverrides;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Which tier a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Tier1,
    Tier2,
}

impl TaskKind {
    fn id_prefix(self) -> &'static str {
        match self {
            TaskKind::Tier1 => "l1",
            TaskKind::Tier2 => "l2",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Tier1 => write!(f, "tier1"),
            TaskKind::Tier2 => write!(f, "tier2"),
        }
    }
}

/// Kind-specific input of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPayload {
    Tier1 {
        text: String,
        message_indices: Vec<usize>,
    },
    Tier2 {
        /// Tier-1 summaries joined with `\n---\n`.
        text: String,
        /// Ids of the folded tier-1 chunks, oldest first.
        chunk_ids: Vec<String>,
        /// Sum of the folded chunks' original character counts.
        original_chars: usize,
    },
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::Tier1 { .. } => TaskKind::Tier1,
            TaskPayload::Tier2 { .. } => TaskKind::Tier2,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            TaskPayload::Tier1 { text, .. } | TaskPayload::Tier2 { text, .. } => text,
        }
    }
}

/// A queued summarization job. Immutable once enqueued.
#[derive(Debug, Clone)]
pub struct SummaryTask {
    pub id: String,
    pub conversation_id: String,
    pub payload: TaskPayload,
    /// Higher runs first.
    pub priority: i32,
    pub created_at: Instant,
    pub params: GenerationOverrides,
    /// Instance of the conversation's manager that planned the task.
    pub generation: u64,
}

impl SummaryTask {
    pub fn new(conversation_id: impl Into<String>, payload: TaskPayload, priority: i32) -> Self {
        let id = task_id(payload.kind(), payload.text());
        Self {
            id,
            conversation_id: conversation_id.into(),
            payload,
            priority,
            created_at: Instant::now(),
            params: GenerationOverrides::default(),
            generation: 0,
        }
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_params(mut self, params: GenerationOverrides) -> Self {
        self.params = params;
        self
    }

    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    /// Time since the task was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// `{l1|l2}_{unix millis}_{4 digits of a text hash}`.
fn task_id(kind: TaskKind, text: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let digest = Sha256::digest(text.as_bytes());
    let hash = u16::from_be_bytes([digest[0], digest[1]]) % 10_000;
    format!("{}_{millis}_{hash:04}", kind.id_prefix())
}

/// Result of one job, delivered back to the owning conversation.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Tier1Done {
        conversation_id: String,
        generation: u64,
        summary: String,
        original_text: String,
        message_indices: Vec<usize>,
    },
    Tier2Done {
        conversation_id: String,
        generation: u64,
        summary: String,
        original_text: String,
        chunk_ids: Vec<String>,
        original_chars: usize,
    },
    Failed {
        conversation_id: String,
        generation: u64,
        kind: TaskKind,
        task_id: String,
        error: String,
    },
}

impl TaskOutcome {
    pub fn conversation_id(&self) -> &str {
        match self {
            TaskOutcome::Tier1Done {
                conversation_id, ..
            }
            | TaskOutcome::Tier2Done {
                conversation_id, ..
            }
            | TaskOutcome::Failed {
                conversation_id, ..
            } => conversation_id,
        }
    }

    /// Generation of the task this outcome came from.
    pub fn generation(&self) -> u64 {
        match self {
            TaskOutcome::Tier1Done { generation, .. }
            | TaskOutcome::Tier2Done { generation, .. }
            | TaskOutcome::Failed { generation, .. } => *generation,
        }
    }
}
