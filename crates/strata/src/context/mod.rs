//! Tiered conversation context.
//!
//! | Layer | Detail | Lives in |
//! |-------|--------|----------|
//! | Cumulative digest | tier-2 blocks, most compressed | [`CumulativeDigest`] |
//! | Tier-1 chunks | detailed summaries of exchange groups | [`SummaryChunk`] |
//! | Raw tail | verbatim recent exchanges | [`ContextState::raw_tail`] |
//!
//! [`ContextManager`] mutates one conversation's [`ContextState`] and
//! schedules summarization; [`ContextRegistry`] owns the managers and routes
//! worker outcomes back to them. [`build_context`] and [`TriggerPolicy`] are
//! pure and can be used on their own.

pub mod builder;
pub mod history;
pub mod interaction;
pub mod manager;
pub mod policy;
pub mod registry;
pub mod state;
pub mod store;

pub use builder::build_context;
pub use history::{Conversation, ConversationHistory, InMemoryHistory};
pub use interaction::Interaction;
pub use manager::ContextManager;
pub use policy::TriggerPolicy;
pub use registry::ContextRegistry;
pub use state::{
    ContextState, ContextStats, CumulativeDigest, DigestEntry, SummaryBlock, SummaryChunk,
};
pub use store::StateStore;
