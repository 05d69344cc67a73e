//! Intervention triggering
//!
//! This module decides when a freshly computed assessment should notify the
//! external intervention agent: only on strict level escalation, only after
//! the per-person cooldown, and at most once per observation period. The
//! agent's failure or latency never affects scoring correctness.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::RiskError;
use crate::retry::RetryPolicy;
use crate::types::Assessment;

/// External intervention agent: takes an assessment with its breakdown and
/// produces opaque human-facing content out of band.
#[async_trait]
pub trait InterventionSink: Send + Sync {
    async fn notify(&self, assessment: &Assessment) -> Result<(), RiskError>;
}

/// Sink that drops notifications; default wiring for library consumers that
/// only want scores
pub struct NoopSink;

#[async_trait]
impl InterventionSink for NoopSink {
    async fn notify(&self, _assessment: &Assessment) -> Result<(), RiskError> {
        Ok(())
    }
}

/// Why a notification did or did not go out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Dispatched and acknowledged
    Fired,
    /// Level did not strictly escalate
    NotEscalated,
    /// Assessment was not durably persisted; escalation unconfirmed
    Suppressed,
    /// Within the per-person cooldown
    CoolingDown,
    /// This observation period already fired
    AlreadyFired,
    /// No observed period to key idempotency on
    NoPeriod,
    /// Dispatch failed after retries; delivery degraded, scoring unaffected
    DeliveryDegraded,
}

#[derive(Debug, Clone)]
struct FiredRecord {
    period_end: DateTime<Utc>,
    fired_at: DateTime<Utc>,
}

/// Escalation gate in front of an [`InterventionSink`]
pub struct InterventionTrigger {
    sink: Arc<dyn InterventionSink>,
    cooldown: Duration,
    fired: Mutex<HashMap<String, FiredRecord>>,
}

impl InterventionTrigger {
    pub fn new(sink: Arc<dyn InterventionSink>, cooldown_hours: i64) -> Self {
        Self {
            sink,
            cooldown: Duration::hours(cooldown_hours),
            fired: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate an assessment against the escalation/cooldown/idempotency
    /// gates and dispatch when all pass.
    pub async fn maybe_fire(&self, assessment: &Assessment, retry: &RetryPolicy) -> TriggerOutcome {
        self.maybe_fire_at(assessment, retry, Utc::now()).await
    }

    async fn maybe_fire_at(
        &self,
        assessment: &Assessment,
        retry: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> TriggerOutcome {
        if assessment.degraded {
            return TriggerOutcome::Suppressed;
        }
        if !assessment.escalated {
            return TriggerOutcome::NotEscalated;
        }
        let Some(period_end) = assessment.period_end else {
            return TriggerOutcome::NoPeriod;
        };

        {
            let fired = self.fired.lock().await;
            if let Some(record) = fired.get(&assessment.person_id) {
                if record.period_end == period_end {
                    return TriggerOutcome::AlreadyFired;
                }
                if now - record.fired_at < self.cooldown {
                    return TriggerOutcome::CoolingDown;
                }
            }
        }

        let sink = self.sink.clone();
        let dispatched = retry
            .run("intervention dispatch", || {
                let sink = sink.clone();
                async move { sink.notify(assessment).await }
            })
            .await;

        match dispatched {
            Ok(()) => {
                let mut fired = self.fired.lock().await;
                fired.insert(
                    assessment.person_id.clone(),
                    FiredRecord {
                        period_end,
                        fired_at: now,
                    },
                );
                info!(
                    person_id = %assessment.person_id,
                    level = assessment.level.as_str(),
                    "intervention dispatched on escalation"
                );
                TriggerOutcome::Fired
            }
            Err(error) => {
                warn!(
                    person_id = %assessment.person_id,
                    %error,
                    "degraded delivery: intervention dispatch failed"
                );
                TriggerOutcome::DeliveryDegraded
            }
        }
    }
}
