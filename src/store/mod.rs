//! Record store and atomic ledger mutation
//!
//! Two seams, each with two backends:
//!
//! - `RecordStore`: idempotent record insert and filtered reads
//! - `AtomicLedger`: one vote mutation as a single all-or-nothing unit
//!
//! `MongoStore` implements both with MongoDB multi-document transactions.
//! `MemoryStore` implements both with optimistic compare-and-swap on a
//! per-record version. Callers only see the traits; retry policy lives in
//! `ledger::VoteLedger`.

use async_trait::async_trait;

use crate::models::{
    AnalysisRecord, InsertOutcome, LedgerPlan, RecordFilter, Tally, VoteChoice, VoteEntry,
    VoteIntent,
};
use crate::types::{ReclaimError, Result};

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Durable storage for analysis records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a record; a record with the same idempotency key wins
    async fn insert_record(&self, record: AnalysisRecord) -> Result<InsertOutcome>;

    /// Read one record
    async fn get_record(&self, id: &str) -> Result<Option<AnalysisRecord>>;

    /// Filtered listing, newest first
    async fn find_records(&self, filter: &RecordFilter) -> Result<Vec<AnalysisRecord>>;
}

/// One requested change to the vote ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerMutation {
    pub record_id: String,
    pub voter_id: String,
    pub intent: VoteIntent,
}

/// What a successful ledger unit committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCommit {
    pub plan: LedgerPlan,
    /// Tally after the commit
    pub tally: Tally,
    /// Fields held at zero instead of going negative
    pub clamped: Vec<VoteChoice>,
}

/// Why a ledger attempt did not commit
#[derive(Debug)]
pub enum AttemptError {
    /// Lost a race; nothing was applied and the attempt can be retried
    Conflict(String),
    /// Anything else; nothing was applied
    Failed(ReclaimError),
}

impl From<ReclaimError> for AttemptError {
    fn from(err: ReclaimError) -> Self {
        Self::Failed(err)
    }
}

/// Atomic vote entry + tally mutation
#[async_trait]
pub trait AtomicLedger: Send + Sync {
    /// Read the previous vote, plan the transition, and commit the entry
    /// change together with the tally change, or nothing at all.
    async fn apply_vote(&self, mutation: &LedgerMutation) -> std::result::Result<LedgerCommit, AttemptError>;

    /// Current vote entry for (record, voter)
    async fn get_vote(&self, record_id: &str, voter_id: &str) -> Result<Option<VoteEntry>>;

    /// Tally recomputed from the vote entries themselves
    async fn count_votes(&self, record_id: &str) -> Result<Tally>;
}
