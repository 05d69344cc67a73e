//! Engine configuration
//!
//! Every tunable of the scoring engine lives here so deployments can adjust
//! weights, windows, and thresholds without code changes: category weights,
//! the signal registry, baseline maturity, hysteresis, cooldown, retention.

use crate::error::RiskError;
use crate::types::{Category, Direction};
use serde::{Deserialize, Serialize};

/// Default sliding window length in days
pub const DEFAULT_WINDOW_DAYS: u32 = 14;

/// Default distinct days of history required before a baseline is mature
pub const DEFAULT_MIN_DAYS: u32 = 7;

/// Default hysteresis margin in score points
pub const DEFAULT_HYSTERESIS_MARGIN: f64 = 5.0;

/// Default consecutive assessments required to de-escalate
pub const DEFAULT_SUSTAIN_COUNT: u32 = 2;

/// Default per-person intervention cooldown in hours
pub const DEFAULT_COOLDOWN_HOURS: i64 = 24;

/// Default inactivity TTL for baseline records in days
pub const DEFAULT_RETENTION_TTL_DAYS: i64 = 90;

/// Default retained assessments per person
pub const DEFAULT_HISTORY_CAP: usize = 500;

/// One registered signal: which category it feeds, which direction counts
/// as risk, and its static importance weight within the category.
///
/// Adding a new behavioral signal means registering a descriptor here, not
/// modifying core logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDescriptor {
    pub signal_id: String,
    pub category: Category,
    pub direction: Direction,
    pub weight: f64,
}

impl SignalDescriptor {
    pub fn new(signal_id: &str, category: Category, direction: Direction, weight: f64) -> Self {
        Self {
            signal_id: signal_id.to_string(),
            category,
            direction,
            weight,
        }
    }
}

/// Static weights over categories for the final composition.
///
/// The remainder up to 1.0 is not a third category: it is the share the
/// composite cedes to maturity damping (pull toward neutral 50 under data
/// scarcity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryWeights {
    pub calendar: f64,
    pub music: f64,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            calendar: 0.5,
            music: 0.4,
        }
    }
}

impl CategoryWeights {
    pub fn weight(&self, category: Category) -> f64 {
        match category {
            Category::Calendar => self.calendar,
            Category::Music => self.music,
        }
    }
}

/// Full configuration surface of the risk engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Category weights for the final composition
    pub category_weights: CategoryWeights,
    /// Registered signals with per-signal importance weights
    pub signals: Vec<SignalDescriptor>,
    /// Distinct observed days required before a baseline is mature
    pub min_days: u32,
    /// Sliding window length in days
    pub window_days: u32,
    /// Escalation/de-escalation margin in score points
    pub hysteresis_margin: f64,
    /// Consecutive assessments required below threshold to de-escalate
    pub sustain_count: u32,
    /// Steepness of the logistic squashing curve
    pub logistic_steepness: f64,
    /// Per-person intervention cooldown in hours
    pub cooldown_hours: i64,
    /// Inactivity TTL for baseline records in days
    pub retention_ttl_days: i64,
    /// Retained assessments per person; oldest pruned first
    pub history_cap: usize,
    /// Per-attempt timeout for persistence and dispatch calls (ms)
    pub io_timeout_ms: u64,
    /// Backoff schedule between retries (ms)
    pub retry_backoff_ms: Vec<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            category_weights: CategoryWeights::default(),
            signals: default_signals(),
            min_days: DEFAULT_MIN_DAYS,
            window_days: DEFAULT_WINDOW_DAYS,
            hysteresis_margin: DEFAULT_HYSTERESIS_MARGIN,
            sustain_count: DEFAULT_SUSTAIN_COUNT,
            logistic_steepness: 1.0,
            cooldown_hours: DEFAULT_COOLDOWN_HOURS,
            retention_ttl_days: DEFAULT_RETENTION_TTL_DAYS,
            history_cap: DEFAULT_HISTORY_CAP,
            io_timeout_ms: 5_000,
            retry_backoff_ms: vec![200, 800, 3_200],
        }
    }
}

/// Built-in signal registry: calendar social-activity signals and music
/// listening-pattern signals with their default importance weights.
pub fn default_signals() -> Vec<SignalDescriptor> {
    vec![
        SignalDescriptor::new(
            "social_event_frequency",
            Category::Calendar,
            Direction::LowerIsRiskier,
            0.4,
        ),
        SignalDescriptor::new(
            "invitation_decline_rate",
            Category::Calendar,
            Direction::HigherIsRiskier,
            0.3,
        ),
        SignalDescriptor::new(
            "unique_contacts",
            Category::Calendar,
            Direction::LowerIsRiskier,
            0.3,
        ),
        SignalDescriptor::new("valence", Category::Music, Direction::LowerIsRiskier, 0.3),
        SignalDescriptor::new(
            "late_night_fraction",
            Category::Music,
            Direction::HigherIsRiskier,
            0.25,
        ),
        SignalDescriptor::new(
            "listening_hours",
            Category::Music,
            Direction::HigherIsRiskier,
            0.25,
        ),
        SignalDescriptor::new(
            "repeat_rate",
            Category::Music,
            Direction::HigherIsRiskier,
            0.2,
        ),
    ]
}

impl EngineConfig {
    /// Look up the descriptor for a signal id
    pub fn descriptor(&self, signal_id: &str) -> Option<&SignalDescriptor> {
        self.signals.iter().find(|d| d.signal_id == signal_id)
    }

    /// All registered signals of one category
    pub fn signals_in(&self, category: Category) -> impl Iterator<Item = &SignalDescriptor> {
        self.signals.iter().filter(move |d| d.category == category)
    }

    /// Validate invariants the scoring math depends on
    pub fn validate(&self) -> Result<(), RiskError> {
        if self.window_days == 0 {
            return Err(RiskError::ConfigError("window_days must be > 0".into()));
        }
        if self.min_days == 0 {
            return Err(RiskError::ConfigError("min_days must be > 0".into()));
        }
        if self.sustain_count == 0 {
            return Err(RiskError::ConfigError("sustain_count must be > 0".into()));
        }
        if self.logistic_steepness <= 0.0 {
            return Err(RiskError::ConfigError(
                "logistic_steepness must be positive".into(),
            ));
        }
        if self.category_weights.calendar <= 0.0 || self.category_weights.music <= 0.0 {
            return Err(RiskError::ConfigError(
                "category weights must be positive".into(),
            ));
        }
        for descriptor in &self.signals {
            if descriptor.weight <= 0.0 || !descriptor.weight.is_finite() {
                return Err(RiskError::ConfigError(format!(
                    "signal {} has non-positive weight",
                    descriptor.signal_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_covers_both_categories() {
        let config = EngineConfig::default();
        assert_eq!(config.signals_in(Category::Calendar).count(), 3);
        assert_eq!(config.signals_in(Category::Music).count(), 4);
    }

    #[test]
    fn test_default_category_weights_sum_within_unit() {
        let weights = CategoryWeights::default();
        // 0.1 remainder is reserved for maturity damping
        assert!((weights.calendar + weights.music - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_per_category_signal_weights_sum_to_one() {
        let config = EngineConfig::default();
        for category in [Category::Calendar, Category::Music] {
            let total: f64 = config.signals_in(category).map(|d| d.weight).sum();
            assert!((total - 1.0).abs() < 1e-9, "{:?} weights {}", category, total);
        }
    }

    #[test]
    fn test_validate_rejects_bad_weight() {
        let mut config = EngineConfig::default();
        config.signals[0].weight = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"min_days": 3}"#).unwrap();
        assert_eq!(config.min_days, 3);
        assert_eq!(config.window_days, DEFAULT_WINDOW_DAYS);
        assert_eq!(config.signals.len(), 7);
    }
}
