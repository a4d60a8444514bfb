//! On-disk persistence of a conversation's [`ContextState`].
//!
//! One JSON document per conversation, at a path derived from the
//! conversation's creation time and id:
//!
//! ```text
//! {save_dir}/chat_20250101T120000-123_chat-1/context_20250101T120000-123.chat
//! ```
//!
//! Characters of the id outside `[A-Za-z0-9_-]` are replaced by `_`.

use crate::context::history::Conversation;
use crate::context::state::ContextState;
use std::path::{Path, PathBuf};

/// Reads and writes the context document of one conversation.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(save_dir: impl AsRef<Path>, conversation: &Conversation) -> Self {
        let stamp = conversation.created.format("%Y%m%dT%H%M%S-%3f");
        let id = path_safe(&conversation.id);
        let path = save_dir
            .as_ref()
            .join(format!("chat_{stamp}_{id}"))
            .join(format!("context_{stamp}.chat"));
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    pub fn save(&self, state: &ContextState) -> Result<(), String> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| format!("Invalid context path: {}", self.path.display()))?;
        std::fs::create_dir_all(dir).map_err(|e| format!("Failed to create context dir: {e}"))?;

        let tmp_path = self.path.with_extension("chat.tmp");
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| format!("Failed to serialize context state: {e}"))?;
        std::fs::write(&tmp_path, json)
            .map_err(|e| format!("Failed to write temp context state: {e}"))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| format!("Failed to rename context state: {e}"))?;

        Ok(())
    }

    /// Load the saved state. Returns `None` if nothing has been saved yet.
    pub fn load(&self) -> Result<Option<ContextState>, String> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&self.path)
            .map_err(|e| format!("Failed to read context state: {e}"))?;
        let state: ContextState = serde_json::from_str(&json)
            .map_err(|e| format!("Failed to parse context state: {e}"))?;
        Ok(Some(state))
    }
}

fn path_safe(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::state::{SummaryBlock, SummaryChunk, Thresholds};
    use chrono::{Local, TimeZone};
    use tempfile::TempDir;

    fn conversation() -> Conversation {
        let created = Local
            .with_ymd_and_hms(2025, 3, 4, 5, 6, 7)
            .unwrap()
            .checked_add_signed(chrono::Duration::microseconds(123_456))
            .unwrap();
        Conversation::new("c1").with_created(created)
    }

    #[test]
    fn path_is_derived_from_creation_time_and_id() {
        let store = StateStore::new("/data", &conversation());
        assert_eq!(
            store.path(),
            Path::new("/data/chat_20250304T050607-123_c1/context_20250304T050607-123.chat")
        );
    }

    #[test]
    fn same_millisecond_conversations_do_not_share_a_file() {
        let dir = TempDir::new().unwrap();
        let first = conversation();
        let second = Conversation::new("c2").with_created(first.created);
        let a = StateStore::new(dir.path(), &first);
        let b = StateStore::new(dir.path(), &second);
        assert_ne!(a.path(), b.path());

        let mut state = ContextState::new(10, Thresholds::default());
        state.raw_tail = "first".into();
        a.save(&state).unwrap();
        assert!(b.load().unwrap().is_none());
    }

    #[test]
    fn unsafe_id_characters_are_replaced() {
        let conversation = Conversation::new("../x y").with_created(conversation().created);
        let store = StateStore::new("/data", &conversation);
        assert_eq!(
            store.path().parent().unwrap(),
            Path::new("/data/chat_20250304T050607-123____x_y")
        );
    }

    #[test]
    fn load_without_save_is_none() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), &conversation());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_restores_state() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), &conversation());

        let mut state = ContextState::new(500, Thresholds::default());
        state.raw_tail = "User: hi\nAssistant: hello\n\n".into();
        state
            .l1_chunks
            .push(SummaryChunk::from_summary("notes", 120, vec![0, 1]));
        let block = SummaryBlock::from_summary(vec!["a".into()], "digest", 300);
        state.cumulative_digest.add_block(&block);
        state.l2_blocks.push(block);
        state.counters.total_interactions = 3;

        store.save(&state).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(!store.path().with_extension("chat.tmp").exists());
    }

    #[test]
    fn save_overwrites_previous_document() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), &conversation());
        let mut state = ContextState::new(10, Thresholds::default());
        store.save(&state).unwrap();
        state.raw_tail = "newer".into();
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap().unwrap().raw_tail, "newer");
    }

    #[test]
    fn corrupt_document_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), &conversation());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "not json").unwrap();
        let err = store.load().unwrap_err();
        assert!(err.contains("Failed to parse context state"));
    }
}
