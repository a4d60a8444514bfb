//! Text encoding of interactions in the raw tail, and the utilities that turn
//! a flushed tail back into tier-1 jobs.
//!
//! Each interaction is stored in the tail as
//!
//! ```text
//! User: <user text>
//! Assistant: <assistant text>
//!
//! ```
//!
//! and a flushed tail is parsed back into pairs, then packed greedily into
//! chunks without ever splitting a single interaction.

use crate::context::state::char_len;
use regex::Regex;
use std::sync::LazyLock;

pub const USER_PREFIX: &str = "User:";
pub const ASSISTANT_PREFIX: &str = "Assistant:";

/// Separator appended after each interaction in the raw tail.
pub const TAIL_SEPARATOR: &str = "\n\n";

/// Start of an interaction record: beginning of text or a blank line, then `User:`.
static RECORD_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\A|\n\n)User:").expect("valid record regex"));

/// Body of one record: user text up to the first `\nAssistant:`, then the rest.
static RECORD_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A\s*(.*?)\nAssistant:\s*(.*)\z").expect("valid record body regex")
});

/// One user/assistant exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    pub user: String,
    pub assistant: String,
    pub message_indices: Vec<usize>,
}

impl Interaction {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
            message_indices: Vec::new(),
        }
    }

    pub fn with_indices(mut self, indices: Vec<usize>) -> Self {
        self.message_indices = indices;
        self
    }

    /// `User: ...\nAssistant: ...` without the trailing separator.
    pub fn text(&self) -> String {
        format!(
            "{USER_PREFIX} {}\n{ASSISTANT_PREFIX} {}",
            self.user, self.assistant
        )
    }

    /// The interaction as appended to the raw tail.
    pub fn tail_text(&self) -> String {
        format!("{}{TAIL_SEPARATOR}", self.text())
    }

    pub fn char_count(&self) -> usize {
        char_len(&self.text())
    }
}

/// Parse tail text back into interactions.
///
/// The structured record match is tried first; if it yields nothing, a
/// line scanner that tolerates multi-line messages takes over. Text matching
/// neither yields an empty list.
pub fn parse_interactions(text: &str) -> Vec<Interaction> {
    let parsed = parse_records(text);
    if !parsed.is_empty() {
        return parsed;
    }
    scan_lines(text)
}

fn parse_records(text: &str) -> Vec<Interaction> {
    let starts: Vec<(usize, usize)> = RECORD_START
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect();

    let mut interactions = Vec::new();
    for (i, &(_, body_start)) in starts.iter().enumerate() {
        let body_end = starts.get(i + 1).map_or(text.len(), |&(next, _)| next);
        let Some(body) = text.get(body_start..body_end) else {
            continue;
        };
        let Some(caps) = RECORD_BODY.captures(body) else {
            continue;
        };
        let user = caps.get(1).map_or("", |m| m.as_str()).trim();
        let assistant = caps.get(2).map_or("", |m| m.as_str()).trim();
        if !user.is_empty() && !assistant.is_empty() {
            interactions.push(Interaction::new(user, assistant));
        }
    }
    interactions
}

fn scan_lines(text: &str) -> Vec<Interaction> {
    let mut interactions = Vec::new();
    let mut user: Option<String> = None;
    let mut assistant: Option<String> = None;

    let mut finish = |user: &mut Option<String>, assistant: &mut Option<String>| {
        if let (Some(u), Some(a)) = (user.take(), assistant.take()) {
            let (u, a) = (u.trim().to_string(), a.trim().to_string());
            if !u.is_empty() && !a.is_empty() {
                interactions.push(Interaction::new(u, a));
            }
        }
    };

    for line in text.trim().lines() {
        if let Some(rest) = line.strip_prefix(USER_PREFIX) {
            finish(&mut user, &mut assistant);
            user = Some(rest.trim().to_string());
            assistant = None;
        } else if let Some(rest) = line.strip_prefix(ASSISTANT_PREFIX) {
            if user.is_some() {
                assistant = Some(rest.trim().to_string());
            }
        } else if let Some(a) = assistant.as_mut() {
            a.push('\n');
            a.push_str(line);
        } else if let Some(u) = user.as_mut() {
            u.push('\n');
            u.push_str(line);
        }
    }
    finish(&mut user, &mut assistant);
    interactions
}

/// Greedily pack interactions into chunks of at most `target_chars`.
///
/// An interaction is never split: one larger than the target becomes a chunk
/// of its own. Otherwise interactions are appended until the next one would
/// exceed the target, and a new chunk starts.
pub fn group_into_chunks(interactions: Vec<Interaction>, target_chars: usize) -> Vec<Vec<Interaction>> {
    let mut chunks = Vec::new();
    let mut current: Vec<Interaction> = Vec::new();
    let mut current_size = 0;

    for interaction in interactions {
        let size = interaction.char_count();
        if size > target_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_size = 0;
            }
            chunks.push(vec![interaction]);
            continue;
        }
        if current_size + size > target_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += size;
        current.push(interaction);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Summarization input for one chunk.
pub fn chunk_text(chunk: &[Interaction]) -> String {
    chunk
        .iter()
        .map(Interaction::text)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Sorted, de-duplicated message indices covered by a chunk.
pub fn collect_message_indices(chunk: &[Interaction]) -> Vec<usize> {
    let mut indices: Vec<usize> = chunk
        .iter()
        .flat_map(|i| i.message_indices.iter().copied())
        .collect();
    indices.sort_unstable();
    indices.dedup();
    indices
}

/// Cut `text` to at most `max_chars` characters on a char boundary, marking
/// the cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if char_len(text) <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str(" ...[truncated]");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tail_of(pairs: &[(&str, &str)]) -> String {
        pairs
            .iter()
            .map(|(u, a)| Interaction::new(*u, *a).tail_text())
            .collect()
    }

    #[test]
    fn tail_text_format() {
        let i = Interaction::new("hi", "hello");
        assert_eq!(i.tail_text(), "User: hi\nAssistant: hello\n\n");
        assert_eq!(i.char_count(), "User: hi\nAssistant: hello".len());
    }

    #[test]
    fn round_trip_preserves_order_and_content() {
        let pairs = [
            ("What is Rust?", "A systems language."),
            ("And ownership?", "Each value has one owner.\n\nBorrowing lends access."),
            ("Line one\nline two", "Answer"),
            ("Thanks", "You're welcome."),
        ];
        let parsed = parse_interactions(&tail_of(&pairs));
        let got: Vec<(&str, &str)> = parsed
            .iter()
            .map(|i| (i.user.as_str(), i.assistant.as_str()))
            .collect();
        assert_eq!(got, pairs.to_vec());
    }

    #[test]
    fn structured_parse_skips_incomplete_records() {
        let text = "User: orphan question\n\nUser: q\nAssistant: a\n\n";
        let parsed = parse_interactions(text);
        assert_eq!(parsed, vec![Interaction::new("q", "a")]);
    }

    #[test]
    fn fallback_scanner_handles_unseparated_records() {
        // No blank line before the second record, so only the line scanner
        // can tell the records apart.
        let text = "  User: first\ncontinued\nAssistant: one\nmore\nUser: second\nAssistant: two";
        let parsed = parse_interactions(text);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].user, "first\ncontinued");
        assert_eq!(parsed[0].assistant, "one\nmore");
        assert_eq!(parsed[1], Interaction::new("second", "two"));
    }

    #[test]
    fn unparseable_text_yields_nothing() {
        assert!(parse_interactions("").is_empty());
        assert!(parse_interactions("just some notes\nwithout markers").is_empty());
        assert!(parse_interactions("Assistant: no question").is_empty());
    }

    #[test]
    fn grouping_never_splits_and_isolates_oversized() {
        let small = |n: usize| Interaction::new("q".repeat(n), "a");
        // char_count = 6 + n + 1 + 11 + 1 = n + 19
        let interactions = vec![small(1), small(1), small(200), small(1), small(1), small(1)];
        let chunks = group_into_chunks(interactions, 45);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1, 2, 1]);
        assert_eq!(chunks[1][0].user.len(), 200);
        let total: usize = sizes.iter().sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn grouping_packs_exactly_to_target() {
        let i = Interaction::new("q", "a"); // 20 chars
        let chunks = group_into_chunks(vec![i.clone(), i.clone(), i.clone()], 40);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[test]
    fn grouping_empty_input() {
        assert!(group_into_chunks(Vec::new(), 10).is_empty());
    }

    #[test]
    fn chunk_text_and_indices() {
        let chunk = vec![
            Interaction::new("a", "b").with_indices(vec![2, 3]),
            Interaction::new("c", "d").with_indices(vec![3, 0]),
        ];
        assert_eq!(chunk_text(&chunk), "User: a\nAssistant: b\n\nUser: c\nAssistant: d");
        assert_eq!(collect_message_indices(&chunk), vec![0, 2, 3]);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("ääääää", 2), "ää ...[truncated]");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        /// Trimmed, non-empty text built from words, newlines and the record
        /// markers themselves.
        fn message() -> impl Strategy<Value = String> {
            prop::collection::vec(
                prop_oneof![
                    "[a-zA-Z0-9?.,]{1,8}",
                    Just(" ".to_string()),
                    Just("\n".to_string()),
                    Just("User:".to_string()),
                    Just("Assistant:".to_string()),
                ],
                1..10,
            )
            .prop_map(|parts| parts.concat().trim().to_string())
            .prop_filter("non-empty", |text| !text.is_empty())
        }

        fn pair() -> impl Strategy<Value = (String, String)> {
            (message(), message()).prop_filter("no record boundary inside", |(user, assistant)| {
                !user.contains("\nAssistant:")
                    && !user.contains("\n\nUser:")
                    && !assistant.contains("\n\nUser:")
            })
        }

        fn interaction() -> impl Strategy<Value = Interaction> {
            ("[a-z ]{0,60}", "[a-z ]{0,60}").prop_map(|(u, a)| Interaction::new(u, a))
        }

        proptest! {
            #[test]
            fn parse_recovers_every_tail(pairs in prop::collection::vec(pair(), 1..8)) {
                let tail: String = pairs
                    .iter()
                    .map(|(u, a)| Interaction::new(u.as_str(), a.as_str()).tail_text())
                    .collect();
                let parsed: Vec<(String, String)> = parse_interactions(&tail)
                    .into_iter()
                    .map(|i| (i.user, i.assistant))
                    .collect();
                prop_assert_eq!(parsed, pairs);
            }

            #[test]
            fn grouping_keeps_order_and_respects_target(
                interactions in prop::collection::vec(interaction(), 0..20),
                target in 1usize..200,
            ) {
                let chunks = group_into_chunks(interactions.clone(), target);
                prop_assert!(chunks.iter().all(|chunk| !chunk.is_empty()));

                let flattened: Vec<Interaction> = chunks.iter().flatten().cloned().collect();
                prop_assert_eq!(flattened, interactions);

                for chunk in chunks.iter().filter(|chunk| chunk.len() > 1) {
                    let size: usize = chunk.iter().map(Interaction::char_count).sum();
                    prop_assert!(size <= target);
                }
            }
        }
    }
}
