//! Per-conversation context state: raw tail, tier-1 chunks, tier-2 blocks,
//! and the cumulative digest.
//!
//! Everything here is plain serializable data. Mutation is owned by the
//! conversation's [`ContextManager`](super::ContextManager); this module only
//! knows how to build summary records and fold blocks into the digest.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Character count as the context layers measure text (Unicode scalar values).
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// `original / max(summary, 1)`. Never negative, never divides by zero.
pub fn compression_ratio(original_chars: usize, summary_chars: usize) -> f64 {
    original_chars as f64 / summary_chars.max(1) as f64
}

/// Stable identifier derived from summary text: the first 8 bytes of its
/// SHA-256, hex encoded. Identical text always yields the identical id.
pub fn content_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

// ── Summary records ────────────────────────────────────────────────

/// Tier-1 summary of a contiguous group of interactions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SummaryChunk {
    pub id: String,
    pub summary: String,
    pub original_char_count: usize,
    pub summary_char_count: usize,
    pub compression_ratio: f64,
    pub created_at: DateTime<Local>,
    /// Indices of the source messages in the conversation history.
    #[serde(default)]
    pub message_indices: Vec<usize>,
}

impl SummaryChunk {
    pub fn from_summary(
        summary: impl Into<String>,
        original_char_count: usize,
        message_indices: Vec<usize>,
    ) -> Self {
        let summary = summary.into();
        let summary_char_count = char_len(&summary);
        Self {
            id: content_id(&summary),
            compression_ratio: compression_ratio(original_char_count, summary_char_count),
            summary,
            original_char_count,
            summary_char_count,
            created_at: Local::now(),
            message_indices,
        }
    }
}

/// Tier-2 summary of several tier-1 chunks.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SummaryBlock {
    pub id: String,
    /// Ids of the tier-1 chunks this block consumed, oldest first.
    pub l1_chunk_ids: Vec<String>,
    pub summary: String,
    pub original_char_count: usize,
    pub summary_char_count: usize,
    pub compression_ratio: f64,
    pub created_at: DateTime<Local>,
}

impl SummaryBlock {
    pub fn from_summary(
        l1_chunk_ids: Vec<String>,
        summary: impl Into<String>,
        original_char_count: usize,
    ) -> Self {
        let summary = summary.into();
        let summary_char_count = char_len(&summary);
        Self {
            id: content_id(&summary),
            l1_chunk_ids,
            compression_ratio: compression_ratio(original_char_count, summary_char_count),
            summary,
            original_char_count,
            summary_char_count,
            created_at: Local::now(),
        }
    }

    /// The block as it appears inside the cumulative digest.
    pub fn formatted(&self) -> String {
        format!(
            "<sum_block id='{}'>\n{}\n</sum_block>\n\n",
            self.id, self.summary
        )
    }
}

// ── Cumulative digest ──────────────────────────────────────────────

/// Metadata mirror of one block in the digest.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DigestEntry {
    pub id: String,
    pub chunk_ids: Vec<String>,
    pub summary_chars: usize,
    pub original_chars: usize,
    pub compression_ratio: f64,
    pub added_at: DateTime<Local>,
}

/// Ever-growing concatenation of formatted tier-2 blocks.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CumulativeDigest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub total_chars: usize,
    #[serde(default)]
    pub blocks: Vec<DigestEntry>,
    pub last_updated: DateTime<Local>,
}

impl Default for CumulativeDigest {
    fn default() -> Self {
        Self {
            content: String::new(),
            total_chars: 0,
            blocks: Vec::new(),
            last_updated: Local::now(),
        }
    }
}

impl CumulativeDigest {
    /// Append a block; returns the number of characters added.
    pub fn add_block(&mut self, block: &SummaryBlock) -> usize {
        let text = block.formatted();
        let added = char_len(&text);
        self.content.push_str(&text);
        self.total_chars += added;
        self.blocks.push(DigestEntry {
            id: block.id.clone(),
            chunk_ids: block.l1_chunk_ids.clone(),
            summary_chars: block.summary_char_count,
            original_chars: block.original_char_count,
            compression_ratio: block.compression_ratio,
            added_at: Local::now(),
        });
        self.last_updated = Local::now();
        added
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

// ── State ──────────────────────────────────────────────────────────

/// Fold thresholds persisted with the state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub l2_trigger_count: usize,
    pub l2_preserve_ratio: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            l2_trigger_count: 4,
            l2_preserve_ratio: 0.5,
        }
    }
}

/// Running totals for a conversation.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Counters {
    pub total_interactions: u64,
    pub total_characters_processed: u64,
    pub total_summarizations_l1: u64,
    pub total_summarizations_l2: u64,
}

/// Complete context state of one conversation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ContextState {
    /// Most recent, un-summarized exchanges.
    #[serde(default)]
    pub raw_tail: String,
    /// Source-message indices of each interaction in the raw tail, in order.
    #[serde(default)]
    pub raw_tail_indices: Vec<Vec<usize>>,
    pub raw_tail_char_limit: usize,
    /// Tier-1 chunks, oldest first.
    #[serde(default)]
    pub l1_chunks: Vec<SummaryChunk>,
    /// Tier-2 blocks, kept for audit.
    #[serde(default)]
    pub l2_blocks: Vec<SummaryBlock>,
    #[serde(default)]
    pub cumulative_digest: CumulativeDigest,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub counters: Counters,
    #[serde(default)]
    pub last_summarization_time: Option<DateTime<Local>>,
}

impl ContextState {
    pub fn new(raw_tail_char_limit: usize, thresholds: Thresholds) -> Self {
        Self {
            raw_tail: String::new(),
            raw_tail_indices: Vec::new(),
            raw_tail_char_limit,
            l1_chunks: Vec::new(),
            l2_blocks: Vec::new(),
            cumulative_digest: CumulativeDigest::default(),
            thresholds,
            counters: Counters::default(),
            last_summarization_time: None,
        }
    }

    /// Oldest-first prefix of tier-1 chunks to fold for a preserve ratio:
    /// `ceil(count * ratio)`, at least one (when any exist).
    pub fn fold_prefix_len(&self, preserve_ratio: f64) -> usize {
        let count = self.l1_chunks.len();
        if count == 0 {
            return 0;
        }
        let n = (count as f64 * preserve_ratio).ceil() as usize;
        n.clamp(1, count)
    }

    /// Remove the given chunk ids, preserving the order of the rest.
    pub fn remove_chunks(&mut self, ids: &[String]) -> usize {
        let before = self.l1_chunks.len();
        self.l1_chunks.retain(|c| !ids.contains(&c.id));
        before - self.l1_chunks.len()
    }

    pub fn stats(&self) -> ContextStats {
        let raw_tail_chars = char_len(&self.raw_tail);
        let l1_summary_chars: usize = self.l1_chunks.iter().map(|c| c.summary_char_count).sum();
        let retained = raw_tail_chars + l1_summary_chars + self.cumulative_digest.total_chars;
        ContextStats {
            total_interactions: self.counters.total_interactions,
            total_characters_processed: self.counters.total_characters_processed,
            total_summarizations_l1: self.counters.total_summarizations_l1,
            total_summarizations_l2: self.counters.total_summarizations_l2,
            current_raw_tail_chars: raw_tail_chars,
            current_l1_chunks: self.l1_chunks.len(),
            current_l2_blocks: self.l2_blocks.len(),
            cumulative_chars: self.cumulative_digest.total_chars,
            compression_ratio_overall: compression_ratio(
                self.counters.total_characters_processed as usize,
                retained,
            ),
            last_summarization_time: self.last_summarization_time,
        }
    }
}

/// Snapshot of a conversation's context metrics.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ContextStats {
    pub total_interactions: u64,
    pub total_characters_processed: u64,
    pub total_summarizations_l1: u64,
    pub total_summarizations_l2: u64,
    pub current_raw_tail_chars: usize,
    pub current_l1_chunks: usize,
    pub current_l2_blocks: usize,
    pub cumulative_chars: usize,
    pub compression_ratio_overall: f64,
    pub last_summarization_time: Option<DateTime<Local>>,
}
