//! Convenience re-exports for common `strata` types.
//!
//! ```ignore
//! use strata::prelude::*;
//! ```
//!
//! Covers wiring a registry, feeding it exchanges, and running the worker.
//! Lower-level pieces (parsing, the builder's section headers, task
//! payloads) stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ChatRequest, DEFAULT_MODEL, Message, MessageRole, OpenRouterClient};

// ── Configuration ───────────────────────────────────────────────────
pub use crate::api::retry::RetryConfig;
pub use crate::config::{ContextConfig, GenerationOverrides};

// ── Context ─────────────────────────────────────────────────────────
pub use crate::context::{
    ContextManager, ContextRegistry, ContextState, ContextStats, Conversation,
    ConversationHistory, InMemoryHistory, TriggerPolicy, build_context,
};

// ── Events ──────────────────────────────────────────────────────────
pub use crate::events::{ContextEvent, EventHandler, FnEventHandler, LoggingHandler, NoopHandler};

// ── Summarization ───────────────────────────────────────────────────
pub use crate::summarize::{
    FnSummarizer, LlmSummarizer, Summarizer, SummarizerSet, SummaryFuture, SummaryRequest,
    SummaryResult, SummaryTier,
};

// ── Worker ──────────────────────────────────────────────────────────
pub use crate::worker::{TaskQueue, WorkerHandle, WorkerStats};
