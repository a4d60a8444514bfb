//! Trigger predicates for tier-1 flushes and tier-2 folds.

use crate::config::{ContextConfig, clamp_preserve_ratio};
use crate::context::state::char_len;

/// Stateless trigger policy. Safe to call from any thread without locking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerPolicy {
    pub raw_tail_char_limit: usize,
    pub l2_trigger_count: usize,
    pub l2_preserve_ratio: f64,
}

impl TriggerPolicy {
    /// A trigger count below one is raised to one: folding needs at least
    /// one chunk.
    pub fn new(raw_tail_char_limit: usize, l2_trigger_count: usize, l2_preserve_ratio: f64) -> Self {
        Self {
            raw_tail_char_limit,
            l2_trigger_count: l2_trigger_count.max(1),
            l2_preserve_ratio: clamp_preserve_ratio(l2_preserve_ratio),
        }
    }

    pub fn from_config(config: &ContextConfig) -> Self {
        Self::new(
            config.raw_tail.char_limit,
            config.summarization.l2_trigger_count,
            config.summarization.clamped_preserve_ratio(),
        )
    }

    /// True iff the tail is strictly longer than the limit.
    pub fn should_flush_tail(&self, tail: &str) -> bool {
        char_len(tail) > self.raw_tail_char_limit
    }

    /// True iff enough tier-1 chunks exist to fold into a tier-2 block.
    pub fn should_fold_to_tier2(&self, tier1_count: usize) -> bool {
        tier1_count >= self.l2_trigger_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_is_strictly_greater_than_limit() {
        let policy = TriggerPolicy::new(5, 4, 0.5);
        assert!(!policy.should_flush_tail(""));
        assert!(!policy.should_flush_tail("12345"));
        assert!(policy.should_flush_tail("123456"));
    }

    #[test]
    fn flush_counts_characters_not_bytes() {
        let policy = TriggerPolicy::new(3, 4, 0.5);
        assert!(!policy.should_flush_tail("äöü"));
    }

    #[test]
    fn fold_is_monotonic_in_chunk_count() {
        let policy = TriggerPolicy::new(100, 4, 0.5);
        let results: Vec<bool> = (0..10).map(|n| policy.should_fold_to_tier2(n)).collect();
        let first_true = results.iter().position(|&b| b).unwrap();
        assert_eq!(first_true, 4);
        assert!(results[first_true..].iter().all(|&b| b));
    }

    #[test]
    fn zero_trigger_count_never_folds_an_empty_list() {
        let policy = TriggerPolicy::new(100, 0, 0.5);
        assert_eq!(policy.l2_trigger_count, 1);
        assert!(!policy.should_fold_to_tier2(0));
        assert!(policy.should_fold_to_tier2(1));
    }

    #[test]
    fn from_config_clamps_thresholds() {
        let config = ContextConfig::default().with_l2_trigger(0, 5.0);
        let policy = TriggerPolicy::from_config(&config);
        assert_eq!(policy.l2_trigger_count, 1);
        assert_eq!(policy.l2_preserve_ratio, 1.0);
    }

    #[test]
    fn preserve_ratio_is_clamped_on_construction() {
        assert_eq!(TriggerPolicy::new(1, 1, 7.0).l2_preserve_ratio, 1.0);
        assert_eq!(TriggerPolicy::new(1, 1, 0.01).l2_preserve_ratio, 0.1);
    }
}
