//! Summarization backends.
//!
//! The [`Summarizer`] trait is the seam between the background worker and
//! whatever produces summaries. Two tiers exist:
//!
//! | Tier | Used for | Default budget |
//! |------|----------|----------------|
//! | [`SummaryTier::Detailed`] | tier-1 chunks of raw exchanges | 200 tokens |
//! | [`SummaryTier::Condensed`] | tier-2 blocks of tier-1 summaries | 120 tokens |
//!
//! [`LlmSummarizer`] calls OpenRouter; [`FnSummarizer`] adapts a plain
//! closure for tests and offline runs.

pub mod llm;

pub use llm::LlmSummarizer;

use crate::OpenRouterClient;
use crate::config::GenerationOverrides;
use crate::context::state::{char_len, compression_ratio};
use crate::worker::TaskKind;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Boxed future returned by [`Summarizer::summarize`].
pub type SummaryFuture<'a> = Pin<Box<dyn Future<Output = SummaryResult> + Send + 'a>>;

/// Produces a summary of a text. Implementations report failure through
/// [`SummaryResult::success`] rather than panicking.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, request: SummaryRequest) -> SummaryFuture<'_>;
}

/// Input to one summarization call.
#[derive(Debug, Clone, Default)]
pub struct SummaryRequest {
    pub text: String,
    /// Per-call overrides of the tier's sampling defaults.
    pub params: GenerationOverrides,
}

impl SummaryRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: GenerationOverrides::default(),
        }
    }

    pub fn with_params(mut self, params: GenerationOverrides) -> Self {
        self.params = params;
        self
    }
}

/// Outcome of one summarization call.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryResult {
    pub summary: String,
    pub success: bool,
    pub error: Option<String>,
    /// Characters in the input.
    pub original_length: usize,
    /// Characters in the summary.
    pub summary_length: usize,
    pub compression_ratio: f64,
    pub processing_time: Duration,
}

impl SummaryResult {
    pub fn ok(original: &str, summary: impl Into<String>, processing_time: Duration) -> Self {
        let summary = summary.into();
        let original_length = char_len(original);
        let summary_length = char_len(&summary);
        Self {
            summary,
            success: true,
            error: None,
            original_length,
            summary_length,
            compression_ratio: compression_ratio(original_length, summary_length),
            processing_time,
        }
    }

    pub fn failed(original: &str, error: impl Into<String>, processing_time: Duration) -> Self {
        Self {
            summary: String::new(),
            success: false,
            error: Some(error.into()),
            original_length: char_len(original),
            summary_length: 0,
            compression_ratio: 1.0,
            processing_time,
        }
    }
}

// ── Tiers ──────────────────────────────────────────────────────────

/// Sampling parameters of one call after overrides are applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repetition_penalty: f32,
}

impl SamplingParams {
    pub fn apply(mut self, overrides: &GenerationOverrides) -> Self {
        if let Some(v) = overrides.max_tokens {
            self.max_tokens = v;
        }
        if let Some(v) = overrides.temperature {
            self.temperature = v;
        }
        if let Some(v) = overrides.top_p {
            self.top_p = v;
        }
        if let Some(v) = overrides.top_k {
            self.top_k = v;
        }
        if let Some(v) = overrides.repetition_penalty {
            self.repetition_penalty = v;
        }
        self
    }
}

const DETAILED_SYSTEM_PROMPT: &str = "\
You write detailed notes of conversation excerpts for a system's short-term memory.
Preserve as many important details, facts, decisions, and context as possible.

Requirements:
0. Do not write headings or format the text
1. Keep all key facts, data, names, dates, and numbers
2. List concrete decisions, actions, and instructions
3. Capture the context of the discussion and the logical links within it
4. Note important conclusions and agreements
5. Keep technical details, commands, and parameters if present
6. Be thorough but avoid repetition
7. Write the notes in the language of the original messages

Format: continuous prose, 5-7 sentences that keep the essential details. \
Fewer sentences are fine if no critical detail is lost.";

const CONDENSED_SYSTEM_PROMPT: &str = "\
You analyze discussion history. Write a condensed record based on several sets of notes.

Requirements:
0. Do not use headings, formatting, or Markdown
1. Keep the chronology of the topics discussed
2. Highlight the key turning points of the discussion
3. Note the decisions made and how they evolved
4. Show how the different parts of the discussion relate
5. Be as brief as possible while keeping the meaning intact
6. Prefer shorter wording where possible
7. Write the record in the language of the original notes

Format: short continuous prose, 2-3 sentences.";

/// Summary detail level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryTier {
    /// Detailed notes of raw exchanges (tier 1).
    Detailed,
    /// Condensed record of several tier-1 notes (tier 2).
    Condensed,
}

impl SummaryTier {
    pub fn for_kind(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Tier1 => SummaryTier::Detailed,
            TaskKind::Tier2 => SummaryTier::Condensed,
        }
    }

    pub fn default_params(self) -> SamplingParams {
        let max_tokens = match self {
            SummaryTier::Detailed => 200,
            SummaryTier::Condensed => 120,
        };
        SamplingParams {
            max_tokens,
            temperature: 0.3,
            top_p: 0.9,
            top_k: 40,
            repetition_penalty: 1.1,
        }
    }

    pub fn system_prompt(self) -> &'static str {
        match self {
            SummaryTier::Detailed => DETAILED_SYSTEM_PROMPT,
            SummaryTier::Condensed => CONDENSED_SYSTEM_PROMPT,
        }
    }

    pub fn user_prompt(self, text: &str) -> String {
        match self {
            SummaryTier::Detailed => format!(
                "Conversation to take notes on:\n\n{text}\n\nWrite brief notes on this discussion, following the requirements above:"
            ),
            SummaryTier::Condensed => format!(
                "Notes on parts of the conversation (in chronological order):\n\n{text}\n\nWrite a condensed record, following the requirements above:"
            ),
        }
    }

    /// Marker prefixed to every cleaned summary of this tier.
    pub fn marker(self) -> &'static str {
        match self {
            SummaryTier::Detailed => "[L1 Summary]",
            SummaryTier::Condensed => "[L2 Summary]",
        }
    }
}

// ── Summarizer set ─────────────────────────────────────────────────

/// One summarizer per tier, as handed to the worker.
#[derive(Clone)]
pub struct SummarizerSet {
    pub detailed: Arc<dyn Summarizer>,
    pub condensed: Arc<dyn Summarizer>,
}

impl SummarizerSet {
    pub fn new(detailed: Arc<dyn Summarizer>, condensed: Arc<dyn Summarizer>) -> Self {
        Self {
            detailed,
            condensed,
        }
    }

    /// Use the same summarizer for both tiers.
    pub fn uniform(summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            detailed: Arc::clone(&summarizer),
            condensed: summarizer,
        }
    }

    /// OpenRouter-backed summarizers for both tiers, sharing one client.
    pub fn openrouter(client: Arc<OpenRouterClient>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            detailed: Arc::new(LlmSummarizer::new(
                Arc::clone(&client),
                model.clone(),
                SummaryTier::Detailed,
            )),
            condensed: Arc::new(LlmSummarizer::new(client, model, SummaryTier::Condensed)),
        }
    }

    pub fn for_kind(&self, kind: TaskKind) -> &Arc<dyn Summarizer> {
        match SummaryTier::for_kind(kind) {
            SummaryTier::Detailed => &self.detailed,
            SummaryTier::Condensed => &self.condensed,
        }
    }
}

// ── FnSummarizer ───────────────────────────────────────────────────

/// Adapts a synchronous closure into a [`Summarizer`].
///
/// ```ignore
/// let echo = FnSummarizer::new(|text: &str| Ok(format!("summary of {} chars", text.len())));
/// ```
pub struct FnSummarizer<F>
where
    F: Fn(&str) -> Result<String, String> + Send + Sync,
{
    f: F,
}

impl<F> FnSummarizer<F>
where
    F: Fn(&str) -> Result<String, String> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Summarizer for FnSummarizer<F>
where
    F: Fn(&str) -> Result<String, String> + Send + Sync,
{
    fn summarize(&self, request: SummaryRequest) -> SummaryFuture<'_> {
        Box::pin(async move {
            let start = Instant::now();
            match (self.f)(&request.text) {
                Ok(summary) => SummaryResult::ok(&request.text, summary, start.elapsed()),
                Err(e) => SummaryResult::failed(&request.text, e, start.elapsed()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_metrics() {
        let ok = SummaryResult::ok("x".repeat(100).as_str(), "tiny", Duration::ZERO);
        assert!(ok.success);
        assert_eq!(ok.original_length, 100);
        assert_eq!(ok.summary_length, 4);
        assert_eq!(ok.compression_ratio, 25.0);

        let failed = SummaryResult::failed("abc", "boom", Duration::ZERO);
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(failed.compression_ratio, 1.0);
    }

    #[test]
    fn overrides_replace_only_set_fields() {
        let params = SummaryTier::Detailed.default_params().apply(&GenerationOverrides {
            max_tokens: Some(64),
            top_k: Some(10),
            ..Default::default()
        });
        assert_eq!(params.max_tokens, 64);
        assert_eq!(params.top_k, 10);
        assert_eq!(params.temperature, 0.3);
        assert_eq!(params.top_p, 0.9);
        assert_eq!(SummaryTier::Condensed.default_params().max_tokens, 120);
    }

    #[test]
    fn tiers_follow_task_kind() {
        assert_eq!(SummaryTier::for_kind(TaskKind::Tier1), SummaryTier::Detailed);
        assert_eq!(SummaryTier::for_kind(TaskKind::Tier2), SummaryTier::Condensed);
        assert!(SummaryTier::Condensed.user_prompt("abc").contains("abc"));
    }

    #[tokio::test]
    async fn fn_summarizer_reports_success_and_failure() {
        let summarizer = FnSummarizer::new(|text: &str| {
            if text.is_empty() {
                Err("empty input".to_string())
            } else {
                Ok(text.to_uppercase())
            }
        });
        let ok = summarizer.summarize(SummaryRequest::new("abc")).await;
        assert_eq!(ok.summary, "ABC");
        assert!(ok.success);

        let failed = summarizer.summarize(SummaryRequest::new("")).await;
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("empty input"));
    }

    #[tokio::test]
    async fn set_dispatches_by_kind() {
        let set = SummarizerSet::new(
            Arc::new(FnSummarizer::new(|_: &str| Ok("detailed".to_string()))),
            Arc::new(FnSummarizer::new(|_: &str| Ok("condensed".to_string()))),
        );
        let one = set.for_kind(TaskKind::Tier1).summarize(SummaryRequest::new("t")).await;
        let two = set.for_kind(TaskKind::Tier2).summarize(SummaryRequest::new("t")).await;
        assert_eq!(one.summary, "detailed");
        assert_eq!(two.summary, "condensed");
    }
}
