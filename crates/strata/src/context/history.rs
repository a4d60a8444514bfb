//! Conversation identity and the message history a manager reads roles from.

use crate::MessageRole;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Identity of one conversation. `created` determines where its context is
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub created: DateTime<Local>,
}

impl Conversation {
    /// A conversation created now.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created: Local::now(),
        }
    }

    pub fn with_created(mut self, created: DateTime<Local>) -> Self {
        self.created = created;
        self
    }
}

/// Read access to a conversation's message list.
///
/// Only roles are needed: the manager records which messages an interaction
/// came from, and the context builder needs the history length.
pub trait ConversationHistory: Send + Sync {
    fn roles(&self) -> Vec<MessageRole>;

    fn len(&self) -> usize {
        self.roles().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Indices of the latest user and latest assistant message, sorted.
///
/// Falls back to the last index when a role is missing; empty history yields
/// no indices.
pub fn latest_exchange_indices(roles: &[MessageRole]) -> Vec<usize> {
    let Some(last) = roles.len().checked_sub(1) else {
        return Vec::new();
    };
    let latest = |role: MessageRole| roles.iter().rposition(|r| *r == role).unwrap_or(last);
    let mut indices = vec![latest(MessageRole::User), latest(MessageRole::Assistant)];
    indices.sort_unstable();
    indices.dedup();
    indices
}

/// Thread-safe in-memory history.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    roles: Mutex<Vec<MessageRole>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, role: MessageRole) {
        self.roles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(role);
    }

    /// Record one user message followed by one assistant message.
    pub fn push_exchange(&self) {
        let mut roles = self.roles.lock().unwrap_or_else(|e| e.into_inner());
        roles.push(MessageRole::User);
        roles.push(MessageRole::Assistant);
    }
}

impl ConversationHistory for InMemoryHistory {
    fn roles(&self) -> Vec<MessageRole> {
        self.roles.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn len(&self) -> usize {
        self.roles.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
