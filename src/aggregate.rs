//! Category aggregation
//!
//! This module combines a category's per-signal sub-scores into one category
//! score. Signals whose source is disabled or that have never been observed
//! are simply absent; the remaining importance weights are renormalized so
//! partial coverage never dilutes the category toward zero.

use crate::config::EngineConfig;
use crate::types::{Category, SubScore};

/// Aggregator for combining sub-scores into category scores
pub struct CategoryAggregator;

impl CategoryAggregator {
    /// Combine the available sub-scores of one category.
    ///
    /// Returns `None` when the category has no available signal at all; that
    /// means the category is unavailable, not that its risk is zero.
    pub fn combine(
        category: Category,
        sub_scores: &[SubScore],
        config: &EngineConfig,
    ) -> Option<f64> {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;

        for sub in sub_scores.iter().filter(|s| s.category == category) {
            let Some(descriptor) = config.descriptor(&sub.signal_id) else {
                continue;
            };
            weighted_sum += descriptor.weight * sub.score;
            weight_total += descriptor.weight;
        }

        if weight_total <= 0.0 {
            return None;
        }

        Some(weighted_sum / weight_total)
    }
}
