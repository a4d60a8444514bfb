//! Tiered, incrementally summarized context for long-running conversations.
//!
//! `strata` keeps the context handed to a generation model bounded no matter
//! how long a conversation runs. Recent exchanges stay verbatim; older ones
//! are compressed by a background worker into layers of summaries:
//!
//! 1. **Raw tail**: the latest exchanges, unmodified, bounded by a character
//!    limit.
//! 2. **Tier-1 chunks**: detailed summaries of contiguous groups of
//!    exchanges that overflowed the raw tail.
//! 3. **Cumulative digest**: condensed tier-2 blocks, each folding the oldest
//!    tier-1 chunks once enough of them accumulate.
//!
//! # Getting started
//!
//! ```ignore
//! use strata::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let config = ContextConfig::default().with_raw_tail_limit(4000);
//!     let registry = ContextRegistry::new(config);
//!
//!     let client = Arc::new(OpenRouterClient::new(std::env::var("OPENROUTER_KEY").unwrap())?);
//!     let worker = registry.spawn_worker(SummarizerSet::openrouter(client, DEFAULT_MODEL))?;
//!
//!     let conversation = Conversation::new("chat-1");
//!     let history = Arc::new(InMemoryHistory::new());
//!     let manager = registry.get_or_create(&conversation, history.clone());
//!
//!     history.push_exchange();
//!     manager.add_interaction("What is a B-tree?", "A balanced search tree...");
//!
//!     let context = manager.context_for_generation();
//!     println!("{context}");
//!
//!     worker.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Data model:** [`context::state`]: [`ContextState`](context::ContextState),
//!   [`SummaryChunk`](context::SummaryChunk), [`SummaryBlock`](context::SummaryBlock),
//!   [`CumulativeDigest`](context::CumulativeDigest).
//! - **When to summarize:** [`context::policy`].
//! - **Orchestration:** [`ContextManager`](context::ContextManager) per
//!   conversation, [`ContextRegistry`](context::ContextRegistry) across them.
//! - **Background work:** [`worker`]: priority [`TaskQueue`](worker::TaskQueue)
//!   and the single [`Worker`](worker::Worker).
//! - **Summarization backends:** [`summarize`].
//! - **Observability:** [`events`].

pub mod api;
pub mod config;
pub mod context;
pub mod events;
pub mod prelude;
pub mod summarize;
pub mod worker;

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for summarization calls.
pub const DEFAULT_MODEL: &str = "qwen/qwen3-8b";

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A chat message sent to the completions API.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

// ── Request / response types ───────────────────────────────────────

/// Chat completion request body. Only the sampling knobs the summarizers use
/// are exposed; unset optional fields are omitted from serialization.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// Clean return type from [`OpenRouterClient::chat`].
#[derive(Debug)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub usage: Option<UsageInfo>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
}

impl OpenRouterClient {
    /// Create a client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("strata/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
        })
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, String> {
        debug!(
            "LLM request: model={}, messages={}, max_tokens={}, temp={}",
            body.model,
            body.messages.len(),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Title", "strata")
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;
        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("OpenRouter API HTTP {status}: {text}"));
        }

        let parsed: RawChatResponse =
            serde_json::from_str(&text).map_err(|e| format!("failed to parse response: {e}"))?;
        if let Some(err) = parsed.error {
            return Err(format!("OpenRouter API error: {}", err.message));
        }

        let content = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content);
        Ok(ChatCompletion {
            content,
            usage: parsed.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_skips_unset_sampling_fields() {
        let req = ChatRequest {
            model: "m".into(),
            messages: vec![Message::system("s"), Message::user("u")],
            max_tokens: 100,
            temperature: 0.3,
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("top_p").is_none());
        assert!(json.get("repetition_penalty").is_none());
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "u");
    }

    #[test]
    fn raw_response_extracts_first_choice() {
        let raw: RawChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"hello"}}],"usage":{"prompt_tokens":3}}"#,
        )
        .unwrap();
        let content = raw
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content);
        assert_eq!(content.as_deref(), Some("hello"));
    }

    #[test]
    fn role_display_is_lowercase() {
        assert_eq!(MessageRole::Assistant.to_string(), "assistant");
    }
}
