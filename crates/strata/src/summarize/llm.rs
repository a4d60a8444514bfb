//! OpenRouter-backed summarizer.

use super::{SummaryFuture, SummaryRequest, SummaryResult, SummaryTier, Summarizer};
use crate::{ChatRequest, Message, OpenRouterClient};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tracing::{debug, warn};

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid think regex"));

const TEMPLATE_MARKERS: [&str; 2] = ["<|im_start|>", "<|im_end|>"];

/// Summarizes through a chat completion call, one tier per instance.
pub struct LlmSummarizer {
    client: Arc<OpenRouterClient>,
    model: String,
    tier: SummaryTier,
}

impl LlmSummarizer {
    pub fn new(client: Arc<OpenRouterClient>, model: impl Into<String>, tier: SummaryTier) -> Self {
        Self {
            client,
            model: model.into(),
            tier,
        }
    }

    fn build_request(&self, request: &SummaryRequest) -> (ChatRequest, String) {
        let params = self.tier.default_params().apply(&request.params);
        let user_prompt = self.tier.user_prompt(&request.text);
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(self.tier.system_prompt()),
                Message::user(user_prompt.clone()),
            ],
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: Some(params.top_p),
            top_k: Some(params.top_k),
            repetition_penalty: Some(params.repetition_penalty),
        };
        (body, user_prompt)
    }
}

impl Summarizer for LlmSummarizer {
    fn summarize(&self, request: SummaryRequest) -> SummaryFuture<'_> {
        Box::pin(async move {
            let start = Instant::now();
            let (body, prompt) = self.build_request(&request);

            let completion = match self.client.chat(&body).await {
                Ok(completion) => completion,
                Err(e) => {
                    warn!("{:?} summarization failed: {e}", self.tier);
                    return SummaryResult::failed(&request.text, e, start.elapsed());
                }
            };
            if let Some(usage) = &completion.usage {
                debug!(
                    "{:?} summarization used {} tokens",
                    self.tier,
                    usage.total_tokens.unwrap_or(0)
                );
            }

            let raw = completion.content.unwrap_or_default();
            let summary = clean_response(self.tier, &raw, &prompt);
            if summary.is_empty() {
                return SummaryResult::failed(&request.text, "empty summary", start.elapsed());
            }
            SummaryResult::ok(&request.text, summary, start.elapsed())
        })
    }
}

/// Normalize a raw model response and prefix the tier marker.
///
/// Strips an echoed prompt, chat-template markers, surrounding quotes and
/// backticks, and `<think>` blocks. A condensed summary that starts with the
/// detailed marker has it replaced.
pub fn clean_response(tier: SummaryTier, response: &str, prompt: &str) -> String {
    let mut text = response.strip_prefix(prompt).unwrap_or(response).trim().to_string();
    for marker in TEMPLATE_MARKERS {
        text = text.replace(marker, "");
    }
    let text = text.trim().trim_matches(|c| matches!(c, '"' | '\'' | '`'));
    let text = THINK_BLOCK.replace_all(text, "");
    let text = text.replace("<think>", "").replace("</think>", "");
    let text = text.trim();

    if text.is_empty() {
        return String::new();
    }

    let detailed = SummaryTier::Detailed.marker();
    let own = tier.marker();
    let marked = if text.starts_with(own) {
        text.to_string()
    } else if let Some(rest) = text.strip_prefix(detailed) {
        format!("{own}{rest}")
    } else {
        format!("{own} {text}")
    };
    marked.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_think_blocks_and_markers() {
        let raw = "<|im_start|>\"<think>plan\nsteps</think>The user asked about B-trees.\"<|im_end|>";
        assert_eq!(
            clean_response(SummaryTier::Detailed, raw, "prompt"),
            "[L1 Summary] The user asked about B-trees."
        );
    }

    #[test]
    fn strips_echoed_prompt() {
        let cleaned = clean_response(SummaryTier::Detailed, "PROMPT  answer", "PROMPT");
        assert_eq!(cleaned, "[L1 Summary] answer");
    }

    #[test]
    fn condensed_replaces_detailed_marker() {
        assert_eq!(
            clean_response(SummaryTier::Condensed, "[L1 Summary] folded", ""),
            "[L2 Summary] folded"
        );
        assert_eq!(
            clean_response(SummaryTier::Condensed, "[L2 Summary] kept", ""),
            "[L2 Summary] kept"
        );
        assert_eq!(
            clean_response(SummaryTier::Condensed, "plain", ""),
            "[L2 Summary] plain"
        );
    }

    #[test]
    fn empty_after_cleaning_stays_empty() {
        assert_eq!(clean_response(SummaryTier::Detailed, "  `<think>x</think>`  ", ""), "");
    }

    #[test]
    fn request_applies_tier_defaults_and_overrides() {
        let client = Arc::new(OpenRouterClient::new("key").unwrap());
        let summarizer = LlmSummarizer::new(client, "m", SummaryTier::Condensed);
        let request = SummaryRequest::new("notes").with_params(crate::config::GenerationOverrides {
            temperature: Some(0.1),
            ..Default::default()
        });
        let (body, prompt) = summarizer.build_request(&request);
        assert_eq!(body.max_tokens, 120);
        assert_eq!(body.temperature, 0.1);
        assert_eq!(body.top_k, Some(40));
        assert_eq!(body.messages.len(), 2);
        assert!(prompt.contains("notes"));
    }
}
