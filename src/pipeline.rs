//! Pipeline orchestration
//!
//! This module provides the public API of the engine. It wires the stages
//! together: observation ingestion into baselines, deviation transforms
//! against baseline snapshots, category aggregation, risk composition,
//! persistence, and the intervention trigger.
//!
//! People are processed independently and in parallel; within one person's
//! timeline baseline updates are serialized per signal, and redundant
//! concurrent assessment computations are coalesced behind a per-person
//! guard (recomputation from the same inputs is idempotent).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

use crate::baseline::BaselineStore;
use crate::composer::{ComposeContext, RiskComposer};
use crate::config::EngineConfig;
use crate::deviation::DeviationTransformer;
use crate::error::RiskError;
use crate::retry::RetryPolicy;
use crate::store::{AssessmentStore, InMemoryAssessmentStore};
use crate::trigger::{InterventionSink, InterventionTrigger, NoopSink, TriggerOutcome};
use crate::types::{Assessment, BaselineSnapshot, SignalObservation, SubScore, UpdateOutcome};

/// Stateful risk-scoring engine.
///
/// Cheap to share: wrap in an [`Arc`] and call from any number of tasks.
pub struct RiskEngine {
    config: EngineConfig,
    baselines: BaselineStore,
    store: Arc<dyn AssessmentStore>,
    trigger: InterventionTrigger,
    retry: RetryPolicy,
    compute_guards: StdMutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RiskEngine {
    /// Create an engine with in-memory persistence and no intervention sink
    pub fn new(config: EngineConfig) -> Result<Self, RiskError> {
        let history_cap = config.history_cap;
        Self::with_collaborators(
            config,
            Arc::new(InMemoryAssessmentStore::new(history_cap)),
            Arc::new(NoopSink),
        )
    }

    /// Create an engine with external persistence and intervention collaborators
    pub fn with_collaborators(
        config: EngineConfig,
        store: Arc<dyn AssessmentStore>,
        sink: Arc<dyn InterventionSink>,
    ) -> Result<Self, RiskError> {
        config.validate()?;
        let retry = RetryPolicy::from_config(&config);
        let trigger = InterventionTrigger::new(sink, config.cooldown_hours);
        let baselines = BaselineStore::new(config.window_days, config.min_days);
        Ok(Self {
            config,
            baselines,
            store,
            trigger,
            retry,
            compute_guards: StdMutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ingest one observation into the person's baselines.
    ///
    /// Observations must match a registered signal descriptor; unknown
    /// signals, category mismatches and direction mismatches are rejected as
    /// `InvalidObservation` before touching any state.
    pub fn ingest_signal(&self, obs: &SignalObservation) -> Result<UpdateOutcome, RiskError> {
        let descriptor = self.config.descriptor(&obs.signal_id).ok_or_else(|| {
            RiskError::InvalidObservation(format!("unregistered signal {}", obs.signal_id))
        })?;
        if descriptor.category != obs.category {
            return Err(RiskError::InvalidObservation(format!(
                "signal {} belongs to category {}, not {}",
                obs.signal_id,
                descriptor.category.as_str(),
                obs.category.as_str()
            )));
        }
        if descriptor.direction != obs.direction {
            return Err(RiskError::InvalidObservation(format!(
                "signal {} has a registered risk direction that contradicts the observation",
                obs.signal_id
            )));
        }

        let outcome = self.baselines.update(obs)?;
        debug!(
            person_id = %obs.person_id,
            signal_id = %obs.signal_id,
            ?outcome,
            "observation ingested"
        );
        Ok(outcome)
    }

    /// Compute, persist and return a fresh assessment for a person.
    ///
    /// Never fails for lack of data: with no mature baselines the score is
    /// fully damped to the neutral 50. When persistence fails after retries
    /// the result is still returned, flagged `degraded`, and the
    /// intervention trigger is suppressed.
    pub async fn compute_assessment(&self, person_id: &str) -> Assessment {
        let guard = self.compute_guard(person_id);
        let _serialized = guard.lock().await;

        let (sub_scores, period_end) = self.collect_sub_scores(person_id);
        let context = self.load_compose_context(person_id).await;

        let mut assessment =
            RiskComposer::compose(person_id, &sub_scores, period_end, &context, &self.config);

        let appended = self
            .retry
            .run("assessment append", || {
                let store = self.store.clone();
                let record = assessment.clone();
                async move { store.append(&record).await }
            })
            .await;

        if let Err(error) = appended {
            warn!(
                person_id = %person_id,
                %error,
                "assessment not durably persisted; returning degraded result"
            );
            assessment.degraded = true;
        } else {
            let outcome = self.trigger.maybe_fire(&assessment, &self.retry).await;
            if outcome == TriggerOutcome::Fired {
                debug!(person_id = %person_id, "escalation notified");
            }
        }

        assessment
    }

    /// Point-in-time baseline snapshot for one signal
    pub fn baseline(&self, person_id: &str, signal_id: &str) -> Option<BaselineSnapshot> {
        self.baselines.query(person_id, signal_id)
    }

    /// Most-recent-first page of a person's assessment history
    pub async fn history(
        &self,
        person_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Assessment>, RiskError> {
        self.store.recent(person_id, limit, offset).await
    }

    /// Evict baseline records inactive beyond the retention TTL.
    /// Returns the number of evicted records.
    pub fn evict_inactive(&self, now: DateTime<Utc>) -> usize {
        self.baselines
            .evict_inactive(now, self.config.retention_ttl_days)
    }

    /// Spawn the background eviction sweep. Abort the returned handle to
    /// stop it.
    pub fn start_sweeper(self: &Arc<Self>, period: StdDuration) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.evict_inactive(Utc::now());
            }
        })
    }

    /// Transform every observed signal of the registry into a sub-score,
    /// carrying the newest contributing period end for trigger idempotency
    fn collect_sub_scores(&self, person_id: &str) -> (Vec<SubScore>, Option<DateTime<Utc>>) {
        let mut sub_scores = Vec::new();
        let mut period_end: Option<DateTime<Utc>> = None;

        for descriptor in &self.config.signals {
            let Some(snapshot) = self.baselines.query(person_id, &descriptor.signal_id) else {
                continue;
            };
            period_end = Some(match period_end {
                Some(current) => current.max(snapshot.latest_period_end),
                None => snapshot.latest_period_end,
            });
            sub_scores.push(DeviationTransformer::transform(
                &descriptor.signal_id,
                descriptor.category,
                &snapshot,
                descriptor.direction,
                self.config.logistic_steepness,
            ));
        }

        (sub_scores, period_end)
    }

    /// Load the hysteresis context from durable history. Read failures
    /// degrade to an empty context rather than failing the computation.
    async fn load_compose_context(&self, person_id: &str) -> ComposeContext {
        let window = self.config.sustain_count.saturating_sub(1) as usize;
        match self.store.recent(person_id, window.max(1), 0).await {
            Ok(recent) => ComposeContext {
                previous_level: recent.first().map(|a| a.level),
                recent_scores: recent.iter().map(|a| a.final_score).collect(),
            },
            Err(error) => {
                warn!(
                    person_id = %person_id,
                    %error,
                    "history unavailable; composing without hysteresis context"
                );
                ComposeContext::default()
            }
        }
    }

    fn compute_guard(&self, person_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut guards = self
            .compute_guards
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guards
            .entry(person_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
