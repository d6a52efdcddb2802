//! Vote ledger
//!
//! Entry point for casting and retracting votes. Each call becomes one
//! `LedgerMutation` applied by an `AtomicLedger` backend as a single
//! all-or-nothing unit. Conflicting concurrent units are retried here with
//! exponential backoff; once attempts are exhausted the call fails with
//! `ReclaimError::Storage` and nothing has been applied.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::models::{LedgerPlan, Tally, VoteChoice, VoteEntry, VoteIntent};
use crate::store::{AtomicLedger, AttemptError, LedgerCommit, LedgerMutation};
use crate::types::{ReclaimError, Result};

/// Retry policy for conflicting ledger units
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Attempts per mutation, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each conflict
    pub base_backoff: Duration,
    /// Upper bound for one attempt against storage
    pub attempt_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(25),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl LedgerConfig {
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Result of a cast or retract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    pub record_id: String,
    pub voter_id: String,
    pub plan: LedgerPlan,
    pub tally: Tally,
    /// Attempts used, including the committing one
    pub attempts: u32,
}

/// Vote ledger over an atomic backend
#[derive(Clone)]
pub struct VoteLedger {
    backend: Arc<dyn AtomicLedger>,
    config: LedgerConfig,
}

impl VoteLedger {
    pub fn new(backend: Arc<dyn AtomicLedger>, config: LedgerConfig) -> Self {
        Self { backend, config }
    }

    /// Record `choice` as the voter's current vote
    ///
    /// Casting the same choice again is a no-op; casting the other choice
    /// moves one vote between the tally fields.
    pub async fn cast(
        &self,
        record_id: &str,
        voter_id: &str,
        choice: VoteChoice,
    ) -> Result<VoteReceipt> {
        self.apply(record_id, voter_id, VoteIntent::Cast(choice))
            .await
    }

    /// Remove the voter's vote, if any
    pub async fn retract(&self, record_id: &str, voter_id: &str) -> Result<VoteReceipt> {
        self.apply(record_id, voter_id, VoteIntent::Retract).await
    }

    /// The voter's current entry
    pub async fn current_vote(&self, record_id: &str, voter_id: &str) -> Result<Option<VoteEntry>> {
        self.backend.get_vote(record_id, voter_id).await
    }

    /// Tally recounted from vote entries
    pub async fn recount(&self, record_id: &str) -> Result<Tally> {
        self.backend.count_votes(record_id).await
    }

    async fn apply(&self, record_id: &str, voter_id: &str, intent: VoteIntent) -> Result<VoteReceipt> {
        let record_id = record_id.trim();
        let voter_id = voter_id.trim();
        if record_id.is_empty() {
            return Err(ReclaimError::BadRequest("Missing record id".into()));
        }
        if voter_id.is_empty() {
            return Err(ReclaimError::BadRequest("Missing voter id".into()));
        }

        let mutation = LedgerMutation {
            record_id: record_id.to_string(),
            voter_id: voter_id.to_string(),
            intent,
        };

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let outcome = tokio::time::timeout(
                self.config.attempt_timeout,
                self.backend.apply_vote(&mutation),
            )
            .await;

            match outcome {
                Err(_) => {
                    warn!(
                        record_id = %mutation.record_id,
                        voter_id = %mutation.voter_id,
                        attempt,
                        "Ledger attempt timed out"
                    );
                    return Err(ReclaimError::Storage(format!(
                        "Ledger update timed out after {:?}",
                        self.config.attempt_timeout
                    )));
                }
                Ok(Ok(commit)) => {
                    self.report(&mutation, &commit, attempt);
                    return Ok(VoteReceipt {
                        record_id: mutation.record_id,
                        voter_id: mutation.voter_id,
                        plan: commit.plan,
                        tally: commit.tally,
                        attempts: attempt,
                    });
                }
                Ok(Err(AttemptError::Failed(e))) => {
                    debug!(
                        record_id = %mutation.record_id,
                        error_kind = e.kind(),
                        "Ledger attempt failed: {}",
                        e
                    );
                    return Err(e);
                }
                Ok(Err(AttemptError::Conflict(reason))) => {
                    if attempt >= max_attempts {
                        warn!(
                            record_id = %mutation.record_id,
                            voter_id = %mutation.voter_id,
                            attempt,
                            "Ledger retries exhausted: {}",
                            reason
                        );
                        return Err(ReclaimError::Storage(format!(
                            "Vote on {} not applied after {} conflicting attempts",
                            mutation.record_id, attempt
                        )));
                    }

                    let delay = self.config.backoff(attempt);
                    debug!(
                        record_id = %mutation.record_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Ledger conflict, retrying: {}",
                        reason
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn report(&self, mutation: &LedgerMutation, commit: &LedgerCommit, attempt: u32) {
        for field in &commit.clamped {
            let err = underflow(&mutation.record_id, *field);
            error!(
                invariant = "tally_non_negative",
                error_kind = err.kind(),
                record_id = %mutation.record_id,
                voter_id = %mutation.voter_id,
                field = field.as_str(),
                plan = commit.plan.label(),
                "{}",
                err
            );
        }

        if commit.plan != LedgerPlan::Unchanged {
            info!(
                record_id = %mutation.record_id,
                voter_id = %mutation.voter_id,
                plan = commit.plan.label(),
                affirmative = commit.tally.affirmative,
                negative = commit.tally.negative,
                attempt,
                "Vote applied"
            );
        }
    }
}

/// A tally field that would have gone below zero and was held at 0
fn underflow(record_id: &str, field: VoteChoice) -> ReclaimError {
    ReclaimError::InvariantViolation(format!(
        "{} tally of record {} would go below zero, held at 0",
        field, record_id
    ))
}
