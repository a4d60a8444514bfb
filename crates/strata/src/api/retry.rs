//! Bounded retry with exponential backoff for summarization calls.
//!
//! Only transient failures (rate limits, 5xx, network errors) are retried,
//! and only inline on the worker: a task is never put back on the queue.
//! The default of zero retries keeps summarization fire-and-forget.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for a single summarization call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Extra attempts after the first failure (0 = drop on first failure).
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff multiplier applied per attempt.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Policy with the given number of retries and default timings.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed), capped at `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(base.min(self.max_delay_ms as f64) as u64)
    }

    /// Whether another attempt is allowed after `attempts_made` failures of
    /// the given error.
    pub fn should_retry(&self, attempts_made: u32, error: &str) -> bool {
        attempts_made <= self.max_retries && is_transient_error(error)
    }
}

/// Whether an error string describes a failure worth retrying.
pub fn is_transient_error(error: &str) -> bool {
    if ["429", "500", "502", "503", "504"]
        .iter()
        .any(|s| error.contains(&format!("HTTP {s}")))
    {
        return true;
    }
    let lower = error.to_lowercase();
    [
        "request failed:",
        "connection reset",
        "connection refused",
        "timed out",
        "timeout",
        "network",
    ]
    .iter()
    .any(|p| lower.contains(p))
}
