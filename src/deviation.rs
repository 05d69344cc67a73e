//! Deviation transform
//!
//! This module converts one raw observation plus its baseline into a
//! normalized 0-100 sub-score: z-score against the personal baseline,
//! clipped, oriented by the signal's risk direction, then squashed through
//! a logistic curve so 0 deviation lands at the neutral 50.

use crate::types::{BaselineSnapshot, Category, Direction, SubScore};

/// Floor substituted for the standard deviation when it would otherwise be
/// used as a divisor at zero
pub const STDDEV_FLOOR: f64 = 1e-6;

/// Z-scores beyond this magnitude carry no additional information
pub const Z_CLIP: f64 = 3.0;

/// Neutral sub-score emitted for immature baselines
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Transformer for converting observations into sub-scores
pub struct DeviationTransformer;

impl DeviationTransformer {
    /// Score the baseline's latest observed value against its rolling
    /// statistics.
    ///
    /// An immature baseline yields the neutral 50 regardless of the value;
    /// the signal then contributes zero to the maturity fraction.
    pub fn transform(
        signal_id: &str,
        category: Category,
        baseline: &BaselineSnapshot,
        direction: Direction,
        steepness: f64,
    ) -> SubScore {
        if !baseline.mature {
            return SubScore {
                signal_id: signal_id.to_string(),
                category,
                score: NEUTRAL_SCORE,
                mature: false,
            };
        }

        let z = z_score(baseline.latest_value, baseline.mean, baseline.stddev);
        let oriented = match direction {
            Direction::HigherIsRiskier => z,
            Direction::LowerIsRiskier => -z,
        };

        SubScore {
            signal_id: signal_id.to_string(),
            category,
            score: logistic(oriented, steepness),
            mature: true,
        }
    }
}

/// Clipped z-score of a value against mean/stddev
fn z_score(value: f64, mean: f64, stddev: f64) -> f64 {
    ((value - mean) / stddev.max(STDDEV_FLOOR)).clamp(-Z_CLIP, Z_CLIP)
}

/// Logistic squash of a z-score onto the 0-100 scale.
/// z = 0 maps to 50, z = +3 to roughly 95, z = -3 to roughly 5.
fn logistic(z: f64, steepness: f64) -> f64 {
    100.0 / (1.0 + (-steepness * z).exp())
}
