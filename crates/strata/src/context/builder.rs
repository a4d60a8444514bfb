//! Assembles the generation context from a [`ContextState`].
//!
//! Sections are ordered from most compressed (oldest) to verbatim (newest):
//!
//! ```text
//! [preamble]
//! [cumulative digest]        <- tier-2 blocks, if any
//! [tier-1 chunk summaries]   <- numbered, oldest first, if any
//! [raw tail]                 <- verbatim, if non-empty
//! ==================================================
//! ```
//!
//! Sections are joined with a blank line. [`build_context`] is pure: it reads
//! the state and never mutates it.

use crate::context::state::ContextState;

/// Instruction block that opens every non-empty context.
pub const PREAMBLE: &str = "\
You are given the conversation context in several parts:

1. <sum_block>...</sum_block> - cumulative summaries of the whole conversation (highest level of abstraction)
2. ## Chunk N: - notes on groups of recent messages (medium detail)
3. Latest messages - the full text of the most recent part of the conversation (maximum detail)

Study ALL of the provided context before answering. Pay particular attention to the latest messages.";

pub const DIGEST_HEADER: &str = "# Cumulative context (conversation history):";
pub const CHUNKS_HEADER: &str = "# Recent discussion notes (medium detail):";
pub const RAW_TAIL_HEADER: &str = "# Latest messages (full text, maximum detail):";

const SECTION_JOIN: &str = "\n\n";
const RULE_WIDTH: usize = 50;

/// Trailing separator between the context and the live dialogue.
pub fn trailing_separator() -> String {
    format!("\n{}\n", "=".repeat(RULE_WIDTH))
}

/// Build the context string. Returns `""` when the history holds fewer than
/// two messages.
pub fn build_context(state: &ContextState, history_len: usize) -> String {
    if history_len < 2 {
        return String::new();
    }

    let mut parts: Vec<String> = vec![PREAMBLE.to_string()];

    if !state.cumulative_digest.is_empty() {
        parts.push(format!("{DIGEST_HEADER}\n{}", state.cumulative_digest.content));
    }

    if !state.l1_chunks.is_empty() {
        let mut section = format!("{CHUNKS_HEADER}\n");
        for (i, chunk) in state.l1_chunks.iter().enumerate() {
            section.push_str(&format!("\n## Chunk {}:\n{}\n", i + 1, chunk.summary));
        }
        parts.push(section);
    }

    if !state.raw_tail.is_empty() {
        parts.push(format!("{RAW_TAIL_HEADER}\n{}", state.raw_tail));
    }

    parts.push(trailing_separator());
    parts.join(SECTION_JOIN)
}
