//! Rolling per-person baselines
//!
//! This module maintains rolling per-(person, signal) statistics over a
//! sliding window of daily aggregate buckets. Buckets hold count, sum and
//! sum-of-squares, allowing exact mean/variance recomputation as old days
//! roll out. Each bucket also keeps a ledger of applied observation
//! timestamps so re-delivered observations stay idempotent even when they
//! arrive late; the ledger is bounded by the window like everything else.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::RiskError;
use crate::types::{BaselineSnapshot, SignalObservation, UpdateOutcome};

/// One day's aggregate of observed values for a single signal
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DayBucket {
    date: NaiveDate,
    count: u32,
    sum: f64,
    sum_sq: f64,
    /// Applied observations of this day, for idempotent re-delivery
    seen: Vec<(DateTime<Utc>, f64)>,
}

impl DayBucket {
    fn new(date: NaiveDate, observed_at: DateTime<Utc>, value: f64) -> Self {
        Self {
            date,
            count: 1,
            sum: value,
            sum_sq: value * value,
            seen: vec![(observed_at, value)],
        }
    }

    fn add(&mut self, observed_at: DateTime<Utc>, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        self.seen.push((observed_at, value));
    }
}

/// Rolling statistics for one `(person_id, signal_id)` pair.
///
/// Exclusively mutated through [`BaselineStore::update`]; everything else
/// sees point-in-time snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineRecord {
    /// Daily buckets ordered oldest to newest, at most `window_days` entries
    buckets: VecDeque<DayBucket>,
    /// Latest applied observation; its value is what the deviation
    /// transform scores
    latest_observed_at: DateTime<Utc>,
    latest_value: f64,
    latest_period_end: DateTime<Utc>,
    /// Wall-clock time of the last mutation, drives TTL eviction
    last_updated: DateTime<Utc>,
}

impl BaselineRecord {
    fn new(obs: &SignalObservation) -> Self {
        Self {
            buckets: VecDeque::from([DayBucket::new(
                obs.observed_at.date_naive(),
                obs.observed_at,
                obs.value,
            )]),
            latest_observed_at: obs.observed_at,
            latest_value: obs.value,
            latest_period_end: obs.period_end,
            last_updated: Utc::now(),
        }
    }

    /// First day still covered by the retained window
    fn window_start(&self, window_days: u32) -> NaiveDate {
        let newest = self
            .buckets
            .back()
            .map(|b| b.date)
            .unwrap_or_else(|| self.latest_observed_at.date_naive());
        newest - Duration::days(i64::from(window_days) - 1)
    }

    fn apply(
        &mut self,
        obs: &SignalObservation,
        window_days: u32,
    ) -> Result<UpdateOutcome, RiskError> {
        let day = obs.observed_at.date_naive();

        if let Some(bucket) = self.buckets.iter().find(|b| b.date == day) {
            if let Some((_, prior)) = bucket
                .seen
                .iter()
                .find(|(at, _)| *at == obs.observed_at)
            {
                if *prior == obs.value {
                    return Ok(UpdateOutcome::Duplicate);
                }
                return Err(RiskError::InvalidObservation(format!(
                    "conflicting duplicate for {} at {}: {} != {}",
                    obs.signal_id, obs.observed_at, obs.value, prior
                )));
            }
        }

        let late = obs.observed_at < self.latest_observed_at;
        if late {
            let window_start = self.window_start(window_days);
            if day < window_start {
                return Err(RiskError::StaleObservation {
                    observed: day,
                    window_start,
                });
            }
        }

        self.upsert_bucket(day, obs.observed_at, obs.value);
        self.roll_window(window_days);

        if !late {
            self.latest_observed_at = obs.observed_at;
            self.latest_value = obs.value;
            self.latest_period_end = obs.period_end;
        }
        self.last_updated = Utc::now();

        if late {
            Ok(UpdateOutcome::Recomputed)
        } else {
            Ok(UpdateOutcome::Applied)
        }
    }

    /// Insert the value into its day bucket, keeping buckets date-ordered
    fn upsert_bucket(&mut self, day: NaiveDate, observed_at: DateTime<Utc>, value: f64) {
        match self.buckets.iter_mut().find(|b| b.date == day) {
            Some(bucket) => bucket.add(observed_at, value),
            None => {
                let position = self.buckets.partition_point(|b| b.date < day);
                self.buckets
                    .insert(position, DayBucket::new(day, observed_at, value));
            }
        }
    }

    /// Drop buckets that fell out of the sliding window
    fn roll_window(&mut self, window_days: u32) {
        let start = self.window_start(window_days);
        while self.buckets.front().is_some_and(|b| b.date < start) {
            self.buckets.pop_front();
        }
    }

    /// Exact mean and population variance over the retained buckets
    fn stats(&self) -> (f64, f64) {
        let count: u32 = self.buckets.iter().map(|b| b.count).sum();
        if count == 0 {
            return (0.0, 0.0);
        }
        let n = f64::from(count);
        let sum: f64 = self.buckets.iter().map(|b| b.sum).sum();
        let sum_sq: f64 = self.buckets.iter().map(|b| b.sum_sq).sum();
        let mean = sum / n;
        // Population variance from aggregates; floating-point cancellation
        // can dip slightly below zero, clamp to the invariant
        let variance = (sum_sq / n - mean * mean).max(0.0);
        (mean, variance)
    }

    fn snapshot(&self, min_days: u32) -> BaselineSnapshot {
        let (mean, variance) = self.stats();
        let distinct_days = self.buckets.len() as u32;
        BaselineSnapshot {
            mean,
            stddev: variance.sqrt(),
            distinct_days,
            mature: distinct_days >= min_days,
            latest_value: self.latest_value,
            latest_observed_at: self.latest_observed_at,
            latest_period_end: self.latest_period_end,
        }
    }
}

type BaselineKey = (String, String);

/// Keyed store of rolling baselines.
///
/// Concurrency contract: a single writer per `(person_id, signal_id)` is
/// enforced by a per-record mutex; readers receive snapshots and never hold
/// a lock beyond the instant of copy.
#[derive(Debug)]
pub struct BaselineStore {
    window_days: u32,
    min_days: u32,
    records: RwLock<HashMap<BaselineKey, Arc<Mutex<BaselineRecord>>>>,
}

impl BaselineStore {
    pub fn new(window_days: u32, min_days: u32) -> Self {
        Self {
            window_days,
            min_days,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Apply one observation to its baseline record.
    ///
    /// Rejections: non-finite values and conflicting duplicates are
    /// `InvalidObservation`; observations whose day predates the retained
    /// window are `StaleObservation`. A late observation still inside the
    /// window is accepted and recomputed from buckets; an identical
    /// re-delivery of an applied observation is an idempotent no-op.
    pub fn update(&self, obs: &SignalObservation) -> Result<UpdateOutcome, RiskError> {
        if !obs.value.is_finite() {
            warn!(
                person_id = %obs.person_id,
                signal_id = %obs.signal_id,
                "rejecting non-finite observation value"
            );
            return Err(RiskError::InvalidObservation(format!(
                "non-finite value for signal {}",
                obs.signal_id
            )));
        }

        let key = (obs.person_id.clone(), obs.signal_id.clone());
        let entry = {
            let records = self.records.read().unwrap_or_else(|e| e.into_inner());
            records.get(&key).cloned()
        };

        let entry = match entry {
            Some(entry) => entry,
            None => {
                let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
                match records.entry(key) {
                    std::collections::hash_map::Entry::Occupied(occupied) => {
                        occupied.get().clone()
                    }
                    std::collections::hash_map::Entry::Vacant(vacant) => {
                        vacant.insert(Arc::new(Mutex::new(BaselineRecord::new(obs))));
                        return Ok(UpdateOutcome::Applied);
                    }
                }
            }
        };

        let mut record = entry.lock().unwrap_or_else(|e| e.into_inner());
        let outcome = record.apply(obs, self.window_days)?;
        if outcome == UpdateOutcome::Recomputed {
            debug!(
                person_id = %obs.person_id,
                signal_id = %obs.signal_id,
                "late observation inside window, recomputed from buckets"
            );
        }
        Ok(outcome)
    }

    /// Point-in-time snapshot of one baseline, `None` if never observed
    pub fn query(&self, person_id: &str, signal_id: &str) -> Option<BaselineSnapshot> {
        let entry = {
            let records = self.records.read().unwrap_or_else(|e| e.into_inner());
            records
                .get(&(person_id.to_string(), signal_id.to_string()))
                .cloned()
        }?;
        let record = entry.lock().unwrap_or_else(|e| e.into_inner());
        Some(record.snapshot(self.min_days))
    }

    /// Remove records with no mutation for longer than `ttl_days`.
    /// Returns the number of evicted records.
    pub fn evict_inactive(&self, now: DateTime<Utc>, ttl_days: i64) -> usize {
        let cutoff = now - Duration::days(ttl_days);
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let before = records.len();
        records.retain(|_, entry| {
            let record = entry.lock().unwrap_or_else(|e| e.into_inner());
            record.last_updated >= cutoff
        });
        let evicted = before - records.len();
        if evicted > 0 {
            debug!(evicted, "evicted inactive baseline records");
        }
        evicted
    }

    /// Number of live `(person, signal)` records
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Direction};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn make_obs(person: &str, signal: &str, value: f64, day: u32, hour: u32) -> SignalObservation {
        let observed_at = Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap();
        SignalObservation {
            person_id: person.to_string(),
            category: Category::Calendar,
            signal_id: signal.to_string(),
            value,
            direction: Direction::LowerIsRiskier,
            observed_at,
            period_start: observed_at - Duration::days(1),
            period_end: observed_at,
        }
    }

    fn store() -> BaselineStore {
        BaselineStore::new(14, 7)
    }

    #[test]
    fn test_mean_variance_accumulation() {
        let store = store();
        for (day, value) in [(1, 2.0), (2, 4.0), (3, 6.0)] {
            store.update(&make_obs("p", "s", value, day, 12)).unwrap();
        }

        let snap = store.query("p", "s").unwrap();
        assert!((snap.mean - 4.0).abs() < 1e-9);
        // Population variance of {2, 4, 6} = 8/3
        assert!((snap.stddev - (8.0_f64 / 3.0).sqrt()).abs() < 1e-9);
        assert_eq!(snap.distinct_days, 3);
        assert!(!snap.mature);
    }

    #[test]
    fn test_maturity_after_min_days() {
        let store = store();
        for day in 1..=7 {
            store.update(&make_obs("p", "s", 5.0, day, 12)).unwrap();
        }
        let snap = store.query("p", "s").unwrap();
        assert_eq!(snap.distinct_days, 7);
        assert!(snap.mature);
    }

    #[test]
    fn test_window_rolls_out_old_days() {
        let store = store();
        // 16 daily observations; only the last 14 days should remain
        for day in 1..=16 {
            store
                .update(&make_obs("p", "s", day as f64, day, 12))
                .unwrap();
        }
        let snap = store.query("p", "s").unwrap();
        assert_eq!(snap.distinct_days, 14);
        // Mean of 3..=16
        assert!((snap.mean - 9.5).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_ingestion_is_noop() {
        let store = store();
        for day in 1..=5 {
            store
                .update(&make_obs("p", "s", day as f64 * 1.1, day, 12))
                .unwrap();
        }
        let before = store.query("p", "s").unwrap();

        let outcome = store.update(&make_obs("p", "s", 5.5, 5, 12)).unwrap();
        assert_eq!(outcome, UpdateOutcome::Duplicate);

        let after = store.query("p", "s").unwrap();
        assert_eq!(before.mean.to_bits(), after.mean.to_bits());
        assert_eq!(before.stddev.to_bits(), after.stddev.to_bits());
    }

    #[test]
    fn test_late_duplicate_is_also_noop() {
        let store = store();
        for day in 1..=5 {
            store
                .update(&make_obs("p", "s", day as f64, day, 12))
                .unwrap();
        }
        let before = store.query("p", "s").unwrap();

        // Re-delivery of day 2's observation, identical value
        let outcome = store.update(&make_obs("p", "s", 2.0, 2, 12)).unwrap();
        assert_eq!(outcome, UpdateOutcome::Duplicate);

        let after = store.query("p", "s").unwrap();
        assert_eq!(before.mean.to_bits(), after.mean.to_bits());
        assert_eq!(before.stddev.to_bits(), after.stddev.to_bits());
        assert_eq!(after.distinct_days, 5);
    }

    #[test]
    fn test_conflicting_duplicate_rejected() {
        let store = store();
        store.update(&make_obs("p", "s", 1.0, 1, 12)).unwrap();
        store.update(&make_obs("p", "s", 2.0, 2, 12)).unwrap();

        let result = store.update(&make_obs("p", "s", 9.0, 2, 12));
        assert!(matches!(result, Err(RiskError::InvalidObservation(_))));
    }

    #[test]
    fn test_non_finite_value_rejected() {
        let store = store();
        let result = store.update(&make_obs("p", "s", f64::NAN, 1, 12));
        assert!(matches!(result, Err(RiskError::InvalidObservation(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_late_observation_within_window_recomputes() {
        let store = store();
        store.update(&make_obs("p", "s", 10.0, 10, 12)).unwrap();
        store.update(&make_obs("p", "s", 20.0, 12, 12)).unwrap();

        // Day 11 arrives late but is inside the retained window
        let outcome = store.update(&make_obs("p", "s", 15.0, 11, 12)).unwrap();
        assert_eq!(outcome, UpdateOutcome::Recomputed);

        let snap = store.query("p", "s").unwrap();
        assert_eq!(snap.distinct_days, 3);
        assert!((snap.mean - 15.0).abs() < 1e-9);
        // Latest applied observation is still day 12
        assert!((snap.latest_value - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_observation_older_than_window_rejected() {
        let store = store();
        store.update(&make_obs("p", "s", 10.0, 20, 12)).unwrap();

        // Day 1 is well outside a 14-day window ending on day 20
        let result = store.update(&make_obs("p", "s", 5.0, 1, 12));
        assert!(matches!(result, Err(RiskError::StaleObservation { .. })));
    }

    #[test]
    fn test_same_day_observations_share_bucket() {
        let store = store();
        store.update(&make_obs("p", "s", 2.0, 1, 8)).unwrap();
        store.update(&make_obs("p", "s", 4.0, 1, 20)).unwrap();

        let snap = store.query("p", "s").unwrap();
        assert_eq!(snap.distinct_days, 1);
        assert!((snap.mean - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_records_are_per_person_per_signal() {
        let store = store();
        store.update(&make_obs("alice", "s", 1.0, 1, 12)).unwrap();
        store.update(&make_obs("bob", "s", 100.0, 1, 12)).unwrap();

        assert!((store.query("alice", "s").unwrap().mean - 1.0).abs() < 1e-9);
        assert!((store.query("bob", "s").unwrap().mean - 100.0).abs() < 1e-9);
        assert!(store.query("alice", "other").is_none());
    }

    #[test]
    fn test_eviction_removes_inactive_records() {
        let store = store();
        store.update(&make_obs("p", "s", 1.0, 1, 12)).unwrap();
        assert_eq!(store.len(), 1);

        // Nothing is older than 90 days yet
        assert_eq!(store.evict_inactive(Utc::now(), 90), 0);

        // Everything is older than a cutoff in the far future
        let future = Utc::now() + Duration::days(365);
        assert_eq!(store.evict_inactive(future, 90), 1);
        assert!(store.is_empty());
    }

    proptest! {
        #[test]
        fn prop_reingestion_never_changes_statistics(
            values in proptest::collection::vec(-1e6..1e6f64, 1..20),
            dup_index in 0usize..20,
        ) {
            let store = store();
            for (i, value) in values.iter().enumerate() {
                store
                    .update(&make_obs("p", "s", *value, i as u32 + 1, 12))
                    .unwrap();
            }
            let before = store.query("p", "s").unwrap();

            // Re-deliver one already applied observation (window is 14 days,
            // so only in-window duplicates are accepted as no-ops)
            let dup = dup_index % values.len();
            let outcome = store.update(&make_obs("p", "s", values[dup], dup as u32 + 1, 12));
            match outcome {
                Ok(o) => prop_assert_eq!(o, UpdateOutcome::Duplicate),
                Err(e) => prop_assert!(
                    matches!(e, RiskError::StaleObservation { .. }),
                    "expected StaleObservation error"
                ),
            }

            let after = store.query("p", "s").unwrap();
            prop_assert_eq!(before.mean.to_bits(), after.mean.to_bits());
            prop_assert_eq!(before.stddev.to_bits(), after.stddev.to_bits());
            prop_assert_eq!(before.distinct_days, after.distinct_days);
        }
    }
}
