//! Support code for calls to the summarization backend.
//!
//! - [`retry`]: bounded retry with exponential backoff for transient
//!   failures. Disabled by default: a failed summarization is dropped.

pub mod retry;
