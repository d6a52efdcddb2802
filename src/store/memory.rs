//! In-memory record store
//!
//! Single-process backend used by tests and local runs. Ledger mutations use
//! optimistic compare-and-swap: the previous vote and the record version are
//! read under a shared lock, the transition is planned without any lock, and
//! the commit re-checks the version under the exclusive lock. A version
//! mismatch aborts the attempt with `AttemptError::Conflict`.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::{AtomicLedger, AttemptError, LedgerCommit, LedgerMutation, RecordStore};
use crate::models::{
    AnalysisRecord, InsertOutcome, LedgerPlan, RecordFilter, Tally, VoteChoice, VoteEntry,
};
use crate::types::{ReclaimError, Result};

struct StoredRecord {
    record: AnalysisRecord,
    /// Bumped on every committed tally change
    version: u64,
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, StoredRecord>,
    /// idempotency key -> record id
    by_key: HashMap<String, String>,
    /// (record id, voter id) -> entry
    votes: HashMap<(String, String), VoteEntry>,
}

/// In-memory store with optimistic ledger commits
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Overwrite a tally without touching vote entries
    #[cfg(test)]
    pub(crate) async fn corrupt_tally(&self, record_id: &str, tally: Tally) {
        let mut state = self.state.write().await;
        if let Some(stored) = state.records.get_mut(record_id) {
            stored.record.votes = tally;
            stored.version += 1;
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_record(&self, record: AnalysisRecord) -> Result<InsertOutcome> {
        let mut state = self.state.write().await;

        if let Some(existing) = state.by_key.get(&record.idempotency_key) {
            return Ok(InsertOutcome::Duplicate(existing.clone()));
        }
        if state.records.contains_key(&record.id) {
            return Err(ReclaimError::Storage(format!(
                "Record id {} already in use",
                record.id
            )));
        }

        let id = record.id.clone();
        state.by_key.insert(record.idempotency_key.clone(), id.clone());
        state
            .records
            .insert(id.clone(), StoredRecord { record, version: 0 });

        Ok(InsertOutcome::Created(id))
    }

    async fn get_record(&self, id: &str) -> Result<Option<AnalysisRecord>> {
        let state = self.state.read().await;
        Ok(state.records.get(id).map(|s| s.record.clone()))
    }

    async fn find_records(&self, filter: &RecordFilter) -> Result<Vec<AnalysisRecord>> {
        let state = self.state.read().await;

        let mut records: Vec<AnalysisRecord> = state
            .records
            .values()
            .map(|s| &s.record)
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        records.truncate(filter.effective_limit());

        Ok(records)
    }
}

#[async_trait]
impl AtomicLedger for MemoryStore {
    async fn apply_vote(
        &self,
        mutation: &LedgerMutation,
    ) -> std::result::Result<LedgerCommit, AttemptError> {
        let key = (mutation.record_id.clone(), mutation.voter_id.clone());

        // Read phase
        let (observed_version, observed_tally, previous) = {
            let state = self.state.read().await;
            let stored = state.records.get(&mutation.record_id).ok_or_else(|| {
                ReclaimError::NotFound(format!("Record {} not found", mutation.record_id))
            })?;
            (
                stored.version,
                stored.record.votes,
                state.votes.get(&key).map(|v| v.vote),
            )
        };

        let plan = LedgerPlan::for_intent(previous, mutation.intent);
        if plan == LedgerPlan::Unchanged {
            return Ok(LedgerCommit {
                plan,
                tally: observed_tally,
                clamped: Vec::new(),
            });
        }

        let next = observed_tally.apply(plan.delta());

        // Validate + write phase
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let stored = state.records.get_mut(&mutation.record_id).ok_or_else(|| {
            ReclaimError::NotFound(format!("Record {} not found", mutation.record_id))
        })?;

        if stored.version != observed_version {
            debug!(
                record_id = %mutation.record_id,
                observed = observed_version,
                current = stored.version,
                "Ledger version moved, aborting attempt"
            );
            return Err(AttemptError::Conflict(format!(
                "record {} changed during vote",
                mutation.record_id
            )));
        }

        match plan {
            LedgerPlan::Insert(choice) | LedgerPlan::Switch { to: choice, .. } => {
                state.votes.insert(
                    key,
                    VoteEntry {
                        record_id: mutation.record_id.clone(),
                        voter_id: mutation.voter_id.clone(),
                        vote: choice,
                        updated_at: Utc::now(),
                    },
                );
            }
            LedgerPlan::Remove(_) => {
                state.votes.remove(&key);
            }
            LedgerPlan::Unchanged => {}
        }

        stored.record.votes = next.tally;
        stored.version += 1;

        Ok(LedgerCommit {
            plan,
            tally: next.tally,
            clamped: next.clamped,
        })
    }

    async fn get_vote(&self, record_id: &str, voter_id: &str) -> Result<Option<VoteEntry>> {
        let state = self.state.read().await;
        Ok(state
            .votes
            .get(&(record_id.to_string(), voter_id.to_string()))
            .cloned())
    }

    async fn count_votes(&self, record_id: &str) -> Result<Tally> {
        let state = self.state.read().await;
        let mut tally = Tally::default();
        for entry in state.votes.values().filter(|v| v.record_id == record_id) {
            match entry.vote {
                VoteChoice::Affirmative => tally.affirmative += 1,
                VoteChoice::Negative => tally.negative += 1,
            }
        }
        Ok(tally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VoteIntent;

    fn record(id: &str, key: &str) -> AnalysisRecord {
        AnalysisRecord {
            id: id.into(),
            idempotency_key: key.into(),
            text: "text".into(),
            explanation: "why".into(),
            severity_score: 0.5,
            counter_responses: vec![],
            tags: Default::default(),
            votes: Tally::default(),
            created_at: Utc::now(),
            submitter_id: "s".into(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_key_returns_existing_record() {
        let store = MemoryStore::new();
        let first = store.insert_record(record("r1", "k1")).await.unwrap();
        let second = store.insert_record(record("r2", "k1")).await.unwrap();

        assert_eq!(first, InsertOutcome::Created("r1".into()));
        assert_eq!(second, InsertOutcome::Duplicate("r1".into()));
        assert_eq!(store.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_apply_vote_missing_record() {
        let store = MemoryStore::new();
        let result = store
            .apply_vote(&LedgerMutation {
                record_id: "missing".into(),
                voter_id: "u1".into(),
                intent: VoteIntent::Cast(VoteChoice::Affirmative),
            })
            .await;
        assert!(matches!(
            result,
            Err(AttemptError::Failed(ReclaimError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_entry_and_tally_change_together() {
        let store = MemoryStore::new();
        store.insert_record(record("r1", "k1")).await.unwrap();

        let commit = store
            .apply_vote(&LedgerMutation {
                record_id: "r1".into(),
                voter_id: "u1".into(),
                intent: VoteIntent::Cast(VoteChoice::Negative),
            })
            .await
            .unwrap();

        assert_eq!(commit.tally, Tally::new(0, 1));
        assert_eq!(store.count_votes("r1").await.unwrap(), commit.tally);
        let entry = store.get_vote("r1", "u1").await.unwrap().unwrap();
        assert_eq!(entry.vote, VoteChoice::Negative);
    }
}
