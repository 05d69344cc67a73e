//! Risk composition
//!
//! This module fuses category scores and baseline-maturity confidence into
//! the final 0-100 score and severity level. Level changes pass through
//! hysteresis so a noisy score hovering at a boundary cannot flap between
//! levels.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::aggregate::CategoryAggregator;
use crate::config::EngineConfig;
use crate::deviation::NEUTRAL_SCORE;
use crate::types::{Assessment, Category, FactorContribution, RiskLevel, SubScore};

/// Prior state the hysteresis decision needs: the last durably stored level
/// and the final scores of recent durable assessments, most recent first.
#[derive(Debug, Clone, Default)]
pub struct ComposeContext {
    pub previous_level: Option<RiskLevel>,
    pub recent_scores: Vec<f64>,
}

/// Composer producing the final assessment record
pub struct RiskComposer;

impl RiskComposer {
    /// Fuse sub-scores into an assessment.
    ///
    /// Never fails for lack of data: with nothing observed the maturity
    /// fraction is zero and the score is fully damped to neutral 50.
    pub fn compose(
        person_id: &str,
        sub_scores: &[SubScore],
        period_end: Option<DateTime<Utc>>,
        context: &ComposeContext,
        config: &EngineConfig,
    ) -> Assessment {
        let calendar_score = CategoryAggregator::combine(Category::Calendar, sub_scores, config);
        let music_score = CategoryAggregator::combine(Category::Music, sub_scores, config);

        let maturity_fraction = if sub_scores.is_empty() {
            0.0
        } else {
            let mature = sub_scores.iter().filter(|s| s.mature).count();
            mature as f64 / sub_scores.len() as f64
        };

        let raw = raw_composite(calendar_score, music_score, config);
        let final_score = (raw * maturity_fraction + NEUTRAL_SCORE * (1.0 - maturity_fraction))
            .clamp(0.0, 100.0);

        let level = resolve_level(
            final_score,
            context.previous_level,
            &context.recent_scores,
            config.hysteresis_margin,
            config.sustain_count,
        );
        let escalated = context
            .previous_level
            .is_some_and(|previous| level > previous);

        let breakdown = build_breakdown(sub_scores, calendar_score, music_score, config);
        let explanation = build_explanation(&breakdown, calendar_score, music_score, maturity_fraction);

        Assessment {
            id: Uuid::new_v4(),
            person_id: person_id.to_string(),
            computed_at: Utc::now(),
            period_end,
            calendar_score,
            music_score,
            maturity_fraction,
            final_score,
            level,
            previous_level: context.previous_level,
            breakdown,
            explanation,
            escalated,
            degraded: false,
        }
    }
}

/// Weighted combination of the available category scores, renormalized when
/// one category is entirely unavailable
fn raw_composite(
    calendar_score: Option<f64>,
    music_score: Option<f64>,
    config: &EngineConfig,
) -> f64 {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    if let Some(score) = calendar_score {
        let weight = config.category_weights.weight(Category::Calendar);
        weighted_sum += score * weight;
        weight_total += weight;
    }
    if let Some(score) = music_score {
        let weight = config.category_weights.weight(Category::Music);
        weighted_sum += score * weight;
        weight_total += weight;
    }

    if weight_total <= 0.0 {
        return NEUTRAL_SCORE;
    }
    weighted_sum / weight_total
}

/// Apply hysteresis to a candidate level change.
///
/// Escalation settles on the highest level above the previous one whose
/// lower bound plus the margin the score still clears. De-escalation to the
/// candidate level requires `sustain` consecutive scores (this one included)
/// below the candidate's upper bound minus the margin.
fn resolve_level(
    final_score: f64,
    previous: Option<RiskLevel>,
    recent_scores: &[f64],
    margin: f64,
    sustain: u32,
) -> RiskLevel {
    let candidate = RiskLevel::from_score(final_score);
    let Some(previous) = previous else {
        return candidate;
    };

    if candidate == previous {
        return previous;
    }

    if candidate > previous {
        let ladder = [
            RiskLevel::Low,
            RiskLevel::Mild,
            RiskLevel::Moderate,
            RiskLevel::High,
        ];
        return ladder
            .into_iter()
            .filter(|level| *level > previous && *level <= candidate)
            .filter(|level| final_score > level.lower_bound() + margin)
            .last()
            .unwrap_or(previous);
    }

    let threshold = candidate.upper_bound() - margin;
    if final_score >= threshold {
        return previous;
    }
    let needed_prior = sustain.saturating_sub(1) as usize;
    let sustained = recent_scores.len() >= needed_prior
        && recent_scores[..needed_prior].iter().all(|s| *s < threshold);
    if sustained {
        candidate
    } else {
        previous
    }
}

/// Per-signal share of the raw composite, largest first
fn build_breakdown(
    sub_scores: &[SubScore],
    calendar_score: Option<f64>,
    music_score: Option<f64>,
    config: &EngineConfig,
) -> Vec<FactorContribution> {
    let mut available_weight = 0.0;
    if calendar_score.is_some() {
        available_weight += config.category_weights.weight(Category::Calendar);
    }
    if music_score.is_some() {
        available_weight += config.category_weights.weight(Category::Music);
    }
    if available_weight <= 0.0 {
        return Vec::new();
    }

    let mut contributions: Vec<FactorContribution> = Vec::with_capacity(sub_scores.len());
    for category in [Category::Calendar, Category::Music] {
        let category_share = config.category_weights.weight(category) / available_weight;
        let signal_weight_total: f64 = sub_scores
            .iter()
            .filter(|s| s.category == category)
            .filter_map(|s| config.descriptor(&s.signal_id))
            .map(|d| d.weight)
            .sum();
        if signal_weight_total <= 0.0 {
            continue;
        }

        for sub in sub_scores.iter().filter(|s| s.category == category) {
            let Some(descriptor) = config.descriptor(&sub.signal_id) else {
                continue;
            };
            let signal_share = descriptor.weight / signal_weight_total;
            contributions.push(FactorContribution {
                signal_id: sub.signal_id.clone(),
                category,
                sub_score: sub.score,
                contribution: category_share * signal_share * sub.score,
            });
        }
    }

    contributions.sort_by(|a, b| {
        b.contribution
            .partial_cmp(&a.contribution)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    contributions
}

/// Deterministic, template-based factor summary. Numeric explanation only;
/// free-text generation stays outside the scoring boundary.
fn build_explanation(
    breakdown: &[FactorContribution],
    calendar_score: Option<f64>,
    music_score: Option<f64>,
    maturity_fraction: f64,
) -> Vec<String> {
    let mut lines = Vec::new();

    if calendar_score.is_none() {
        lines.push("Calendar signals unavailable for this period".to_string());
    }
    if music_score.is_none() {
        lines.push("Music signals unavailable for this period".to_string());
    }

    let mut elevated = 0;
    for factor in breakdown.iter().filter(|f| f.sub_score >= 65.0) {
        lines.push(format!(
            "{} deviates riskward from personal baseline ({} sub-score {:.0})",
            factor.signal_id,
            factor.category.as_str(),
            factor.sub_score
        ));
        elevated += 1;
    }
    if elevated == 0 && !breakdown.is_empty() {
        lines.push("No significant deviation from personal baselines".to_string());
    }

    if maturity_fraction < 1.0 {
        lines.push(format!(
            "Baseline coverage at {:.0}%; score damped toward neutral",
            maturity_fraction * 100.0
        ));
    }

    lines
}
