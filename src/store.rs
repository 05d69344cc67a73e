//! Assessment persistence
//!
//! This module defines the append/query contract the engine needs from a
//! persistence backend, and ships an in-memory reference implementation with
//! per-person retention pruning. Durable backends implement the same trait.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

use crate::error::RiskError;
use crate::types::Assessment;

/// Append-plus-indexed-query contract for assessment history.
///
/// Records are immutable once appended; history is append-only and read
/// most-recent-first.
#[async_trait]
pub trait AssessmentStore: Send + Sync {
    /// Persist one assessment atomically
    async fn append(&self, assessment: &Assessment) -> Result<(), RiskError>;

    /// The most recent durably stored assessment for a person
    async fn latest(&self, person_id: &str) -> Result<Option<Assessment>, RiskError>;

    /// Most-recent-first page of a person's history, restartable via offset
    async fn recent(
        &self,
        person_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Assessment>, RiskError>;
}

/// In-memory assessment store with a per-person retention cap
#[derive(Debug)]
pub struct InMemoryAssessmentStore {
    history_cap: usize,
    // Newest assessment at the front of each deque
    records: RwLock<HashMap<String, VecDeque<Assessment>>>,
}

impl InMemoryAssessmentStore {
    pub fn new(history_cap: usize) -> Self {
        Self {
            history_cap: history_cap.max(1),
            records: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl AssessmentStore for InMemoryAssessmentStore {
    async fn append(&self, assessment: &Assessment) -> Result<(), RiskError> {
        let mut records = self.records.write().await;
        let history = records
            .entry(assessment.person_id.clone())
            .or_insert_with(VecDeque::new);
        history.push_front(assessment.clone());
        // Oldest pruned first
        while history.len() > self.history_cap {
            history.pop_back();
        }
        Ok(())
    }

    async fn latest(&self, person_id: &str) -> Result<Option<Assessment>, RiskError> {
        let records = self.records.read().await;
        Ok(records
            .get(person_id)
            .and_then(|history| history.front().cloned()))
    }

    async fn recent(
        &self,
        person_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Assessment>, RiskError> {
        let records = self.records.read().await;
        Ok(records
            .get(person_id)
            .map(|history| history.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
