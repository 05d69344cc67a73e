//! Core types for the Pulse risk pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: raw signal observations, baseline snapshots, per-signal
//! sub-scores, and the final assessment record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Data-source category a signal belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Calendar,
    Music,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Calendar => "calendar",
            Category::Music => "music",
        }
    }
}

/// Which side of the baseline a signal's deviation counts as risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Values above the personal baseline raise the sub-score
    HigherIsRiskier,
    /// Values below the personal baseline raise the sub-score
    LowerIsRiskier,
}

/// One raw behavioral observation delivered by a feature extractor.
///
/// `value` must be finite; the period bounds describe the aggregation window
/// the extractor computed the value over (e.g. one day of listening).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalObservation {
    /// Person this observation belongs to
    pub person_id: String,
    /// Source category
    pub category: Category,
    /// Registered signal identifier (e.g. "social_event_frequency")
    pub signal_id: String,
    /// Observed value in the signal's native unit
    pub value: f64,
    /// Risk direction of this signal
    pub direction: Direction,
    /// When the observation was made
    pub observed_at: DateTime<Utc>,
    /// Start of the aggregation period the value covers
    pub period_start: DateTime<Utc>,
    /// End of the aggregation period the value covers
    pub period_end: DateTime<Utc>,
}

/// Outcome of applying one observation to the baseline store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// In-order observation applied incrementally
    Applied,
    /// Late observation inside the retained window; statistics were
    /// recomputed from the full bucket window
    Recomputed,
    /// Identical duplicate of the latest applied observation; no-op
    Duplicate,
}

/// Point-in-time copy of one person's baseline statistics for one signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    /// Rolling mean over the retained window
    pub mean: f64,
    /// Rolling standard deviation over the retained window
    pub stddev: f64,
    /// Number of distinct days with at least one observation in the window
    pub distinct_days: u32,
    /// Whether enough history exists to trust this baseline
    pub mature: bool,
    /// Latest applied value (the value the deviation transform scores)
    pub latest_value: f64,
    /// When the latest applied observation was made
    pub latest_observed_at: DateTime<Utc>,
    /// End of the latest observation's aggregation period
    pub latest_period_end: DateTime<Utc>,
}

/// A single signal's normalized 0-100 contribution after baseline comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubScore {
    pub signal_id: String,
    pub category: Category,
    /// Normalized score in [0, 100]; 50 is neutral
    pub score: f64,
    /// Whether the underlying baseline was mature
    pub mature: bool,
}

/// Discrete severity level derived from the final score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Mild,
    Moderate,
    High,
}

impl RiskLevel {
    /// Level a score falls into, ignoring hysteresis:
    /// Low [0,25], Mild (25,50], Moderate (50,75], High (75,100]
    pub fn from_score(score: f64) -> Self {
        if score <= 25.0 {
            RiskLevel::Low
        } else if score <= 50.0 {
            RiskLevel::Mild
        } else if score <= 75.0 {
            RiskLevel::Moderate
        } else {
            RiskLevel::High
        }
    }

    /// Inclusive lower bound of this level's score band
    pub fn lower_bound(&self) -> f64 {
        match self {
            RiskLevel::Low => 0.0,
            RiskLevel::Mild => 25.0,
            RiskLevel::Moderate => 50.0,
            RiskLevel::High => 75.0,
        }
    }

    /// Inclusive upper bound of this level's score band
    pub fn upper_bound(&self) -> f64 {
        match self {
            RiskLevel::Low => 25.0,
            RiskLevel::Mild => 50.0,
            RiskLevel::Moderate => 75.0,
            RiskLevel::High => 100.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Mild => "mild",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
        }
    }
}

/// One entry of an assessment's explainability breakdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorContribution {
    pub signal_id: String,
    pub category: Category,
    /// The signal's sub-score in [0, 100]
    pub sub_score: f64,
    /// The signal's share of the raw composite score
    pub contribution: f64,
}

/// Immutable risk assessment record.
///
/// Produced once by the composer and owned thereafter by the assessment
/// store as a read-only historical fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    /// Unique assessment id
    pub id: Uuid,
    /// Person assessed
    pub person_id: String,
    /// When the assessment was computed
    pub computed_at: DateTime<Utc>,
    /// End of the most recent observation period that contributed;
    /// `None` when no signal has been observed yet
    pub period_end: Option<DateTime<Utc>>,
    /// Calendar category score, `None` when no calendar signal was available
    pub calendar_score: Option<f64>,
    /// Music category score, `None` when no music signal was available
    pub music_score: Option<f64>,
    /// Fraction of observed signals with mature baselines, in [0, 1]
    pub maturity_fraction: f64,
    /// Composite risk score in [0, 100]
    pub final_score: f64,
    /// Severity level after hysteresis
    pub level: RiskLevel,
    /// Level of the previous durably stored assessment, if any
    pub previous_level: Option<RiskLevel>,
    /// Per-signal contributions, largest first
    pub breakdown: Vec<FactorContribution>,
    /// Deterministic human-readable summary of the contributing factors
    pub explanation: Vec<String>,
    /// Whether this assessment strictly escalated the severity level
    pub escalated: bool,
    /// Set when the assessment could not be durably persisted
    pub degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_bands() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(25.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(25.1), RiskLevel::Mild);
        assert_eq!(RiskLevel::from_score(50.0), RiskLevel::Mild);
        assert_eq!(RiskLevel::from_score(50.1), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_score(75.0), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_score(75.1), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(100.0), RiskLevel::High);
    }

    #[test]
    fn test_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Mild);
        assert!(RiskLevel::Mild < RiskLevel::Moderate);
        assert!(RiskLevel::Moderate < RiskLevel::High);
    }

    #[test]
    fn test_level_bounds_are_contiguous() {
        let levels = [
            RiskLevel::Low,
            RiskLevel::Mild,
            RiskLevel::Moderate,
            RiskLevel::High,
        ];
        for pair in levels.windows(2) {
            assert_eq!(pair[0].upper_bound(), pair[1].lower_bound());
        }
    }

    #[test]
    fn test_observation_serde_round_trip() {
        let obs = SignalObservation {
            person_id: "p-1".to_string(),
            category: Category::Music,
            signal_id: "valence".to_string(),
            value: 0.42,
            direction: Direction::LowerIsRiskier,
            observed_at: Utc::now(),
            period_start: Utc::now(),
            period_end: Utc::now(),
        };

        let json = serde_json::to_string(&obs).unwrap();
        assert!(json.contains("\"music\""));
        assert!(json.contains("lower_is_riskier"));

        let back: SignalObservation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.signal_id, "valence");
    }
}
