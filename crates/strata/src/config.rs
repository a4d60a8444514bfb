//! Configuration for context management and background summarization.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Sections mirror the on-disk document:
//!
//! ```json
//! {
//!   "enabled": true,
//!   "save_dir": "saved_dialogs",
//!   "raw_tail": { "char_limit": 2000 },
//!   "summarization": { "l2_trigger_count": 4, "l2_preserve_ratio": 0.5 },
//!   "l1_chunks": { "target_char_limit": 1000, "allow_single_interaction_overflow": true },
//!   "summarization_params": { "l1": { "max_tokens": 200 }, "l2": { "temperature": 0.2 } },
//!   "performance": { "summary_delay_ms": 1000 },
//!   "retry": { "max_retries": 0 }
//! }
//! ```
//!
//! Builder methods cover the settings most callers touch:
//!
//! ```ignore
//! let config = ContextConfig::default()
//!     .with_raw_tail_limit(4000)
//!     .with_l2_trigger(6, 0.5)
//!     .with_summary_delay(Duration::ZERO);
//! ```

use crate::api::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lower bound for the tier-2 preserve ratio.
pub const MIN_PRESERVE_RATIO: f64 = 0.1;
/// Upper bound for the tier-2 preserve ratio.
pub const MAX_PRESERVE_RATIO: f64 = 1.0;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// When false, managers are inert and produce an empty context.
    pub enabled: bool,
    /// Root directory for persisted context documents.
    pub save_dir: PathBuf,
    pub raw_tail: RawTailConfig,
    pub summarization: SummarizationConfig,
    pub l1_chunks: ChunkingConfig,
    pub summarization_params: TierParams,
    pub performance: WorkerConfig,
    pub retry: RetryConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            save_dir: PathBuf::from("saved_dialogs"),
            raw_tail: RawTailConfig::default(),
            summarization: SummarizationConfig::default(),
            l1_chunks: ChunkingConfig::default(),
            summarization_params: TierParams::default(),
            performance: WorkerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl ContextConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
        serde_json::from_str(&json)
            .map_err(|e| format!("Failed to parse config {}: {e}", path.display()))
    }

    /// Disable context management entirely.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = dir.into();
        self
    }

    pub fn with_raw_tail_limit(mut self, chars: usize) -> Self {
        self.raw_tail.char_limit = chars;
        self
    }

    /// Set how many tier-1 chunks trigger a fold and what share of them is folded.
    pub fn with_l2_trigger(mut self, count: usize, preserve_ratio: f64) -> Self {
        self.summarization.l2_trigger_count = count;
        self.summarization.l2_preserve_ratio = preserve_ratio;
        self
    }

    pub fn with_chunk_target(mut self, chars: usize) -> Self {
        self.l1_chunks.target_char_limit = chars;
        self
    }

    pub fn with_summary_delay(mut self, delay: Duration) -> Self {
        self.performance.summary_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Raw tail settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RawTailConfig {
    /// Characters of verbatim text kept before a flush is scheduled.
    pub char_limit: usize,
}

impl Default for RawTailConfig {
    fn default() -> Self {
        Self { char_limit: 2000 }
    }
}

/// Tier-2 folding and task priority settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizationConfig {
    /// Number of tier-1 chunks that triggers a tier-2 fold.
    pub l2_trigger_count: usize,
    /// Share of the oldest tier-1 chunks folded per tier-2 job.
    pub l2_preserve_ratio: f64,
    pub l1_priority: i32,
    pub l2_priority: i32,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            l2_trigger_count: 4,
            l2_preserve_ratio: 0.5,
            l1_priority: 1,
            l2_priority: 5,
        }
    }
}

impl SummarizationConfig {
    /// Preserve ratio clamped to `[MIN_PRESERVE_RATIO, MAX_PRESERVE_RATIO]`.
    pub fn clamped_preserve_ratio(&self) -> f64 {
        clamp_preserve_ratio(self.l2_preserve_ratio)
    }
}

/// Clamp a preserve ratio into its valid range. NaN maps to the lower bound.
pub fn clamp_preserve_ratio(ratio: f64) -> f64 {
    if ratio.is_nan() {
        return MIN_PRESERVE_RATIO;
    }
    ratio.clamp(MIN_PRESERVE_RATIO, MAX_PRESERVE_RATIO)
}

/// How flushed tail text is grouped into tier-1 jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target size of one tier-1 job's input text.
    pub target_char_limit: usize,
    /// Hard cap applied to an oversized single interaction when overflow is
    /// not allowed.
    pub max_char_limit: usize,
    /// Whether a single interaction larger than the target may be sent whole.
    pub allow_single_interaction_overflow: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_char_limit: 1000,
            max_char_limit: 8000,
            allow_single_interaction_overflow: true,
        }
    }
}

/// Per-tier generation overrides carried on each task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TierParams {
    pub l1: GenerationOverrides,
    pub l2: GenerationOverrides,
}

/// Optional sampling overrides; unset fields fall back to the summarizer's
/// tier defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
}

/// Background worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Minimum age of a task before it is summarized, in milliseconds.
    pub summary_delay_ms: u64,
    /// Upper bound on one blocking wait for the queue, in milliseconds.
    pub poll_interval_ms: u64,
    /// Number of concurrent summarization jobs. Only 1 is supported.
    pub max_background_tasks: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            summary_delay_ms: 1000,
            poll_interval_ms: 500,
            max_background_tasks: 1,
        }
    }
}

impl WorkerConfig {
    pub fn summary_delay(&self) -> Duration {
        Duration::from_millis(self.summary_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
