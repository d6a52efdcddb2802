//! MongoDB record store
//!
//! Vote mutations run inside a multi-document transaction: the record read,
//! the previous-vote read, the vote entry write and the tally write all share
//! one session. The tally write is additionally guarded by the counts read
//! inside the transaction, so a concurrent commit shows up either as a
//! transient write conflict or as a zero-match update. Both abort the
//! transaction and surface as `AttemptError::Conflict`.

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::error::{TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT};
use mongodb::ClientSession;
use tracing::{debug, warn};

use super::{AtomicLedger, AttemptError, LedgerCommit, LedgerMutation, RecordStore};
use crate::db::mongo::is_duplicate_key;
use crate::db::schemas::{AnalysisDoc, VoteCounts, VoteDoc, ANALYSIS_COLLECTION, VOTE_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::models::{
    AnalysisRecord, InsertOutcome, LedgerPlan, RecordFilter, Tally, VoteChoice, VoteEntry,
};
use crate::types::{ReclaimError, Result};

/// How many times an unknown commit result is re-committed before giving up
const COMMIT_RETRIES: usize = 3;

/// MongoDB code for a write-write conflict inside a transaction
const WRITE_CONFLICT: i32 = 112;

/// MongoDB code for a unique index violation
const DUPLICATE_KEY: i32 = 11000;

/// MongoDB-backed record store and vote ledger
#[derive(Clone)]
pub struct MongoStore {
    client: MongoClient,
    records: MongoCollection<AnalysisDoc>,
    votes: MongoCollection<VoteDoc>,
}

impl MongoStore {
    /// Open collections and apply indexes
    pub async fn new(client: MongoClient) -> Result<Self> {
        let records = client.collection::<AnalysisDoc>(ANALYSIS_COLLECTION).await?;
        let votes = client.collection::<VoteDoc>(VOTE_COLLECTION).await?;

        Ok(Self {
            client,
            records,
            votes,
        })
    }

    fn parse_id(id: &str) -> Result<ObjectId> {
        Ok(ObjectId::parse_str(id)?)
    }

    fn filter_document(filter: &RecordFilter) -> Document {
        let mut query = Document::new();

        if let Some(tag) = &filter.tag {
            query.insert("tags", tag.clone());
        }
        if let Some(min) = filter.min_severity {
            query.insert("ai_analysis.severity_score", doc! { "$gte": min });
        }
        if let Some(submitter) = &filter.submitter_id {
            query.insert("submitter_id", submitter.clone());
        }

        let mut created = Document::new();
        if let Some(since) = filter.since {
            created.insert("$gte", DateTime::from_chrono(since));
        }
        if let Some(until) = filter.until {
            created.insert("$lt", DateTime::from_chrono(until));
        }
        if !created.is_empty() {
            query.insert("created_at", created);
        }

        query
    }

    /// Body of one ledger transaction; the caller commits or aborts
    async fn vote_in_session(
        &self,
        session: &mut ClientSession,
        record_id: ObjectId,
        mutation: &LedgerMutation,
    ) -> std::result::Result<LedgerCommit, AttemptError> {
        let record = self
            .records
            .inner()
            .find_one(doc! { "_id": record_id })
            .session(&mut *session)
            .await
            .map_err(classify_error)?
            .ok_or_else(|| {
                AttemptError::Failed(ReclaimError::NotFound(format!(
                    "Record {} not found",
                    mutation.record_id
                )))
            })?;

        let key_filter = VoteDoc::key_filter(record_id, &mutation.voter_id);
        let previous = self
            .votes
            .inner()
            .find_one(key_filter.clone())
            .session(&mut *session)
            .await
            .map_err(classify_error)?
            .map(|v| v.vote);

        let observed: VoteCounts = record.votes;
        let current: Tally = observed.into();
        let plan = LedgerPlan::for_intent(previous, mutation.intent);

        if plan == LedgerPlan::Unchanged {
            return Ok(LedgerCommit {
                plan,
                tally: current,
                clamped: Vec::new(),
            });
        }

        match plan {
            LedgerPlan::Insert(choice) => {
                self.votes
                    .inner()
                    .insert_one(VoteDoc::new(record_id, &mutation.voter_id, choice))
                    .session(&mut *session)
                    .await
                    .map_err(classify_error)?;
            }
            LedgerPlan::Switch { from, to } => {
                let mut filter = key_filter;
                filter.insert("vote", choice_bson(from));
                let result = self
                    .votes
                    .inner()
                    .update_one(
                        filter,
                        doc! { "$set": {
                            "vote": choice_bson(to),
                            "updated_at": DateTime::now(),
                            "metadata.updated_at": DateTime::now(),
                        }},
                    )
                    .session(&mut *session)
                    .await
                    .map_err(classify_error)?;
                if result.matched_count == 0 {
                    return Err(AttemptError::Conflict("vote entry changed".into()));
                }
            }
            LedgerPlan::Remove(prev) => {
                let mut filter = key_filter;
                filter.insert("vote", choice_bson(prev));
                let result = self
                    .votes
                    .inner()
                    .delete_one(filter)
                    .session(&mut *session)
                    .await
                    .map_err(classify_error)?;
                if result.deleted_count == 0 {
                    return Err(AttemptError::Conflict("vote entry changed".into()));
                }
            }
            LedgerPlan::Unchanged => {}
        }

        let next = current.apply(plan.delta());
        let stored: VoteCounts = next.tally.into();

        let result = self
            .records
            .inner()
            .update_one(
                doc! {
                    "_id": record_id,
                    "votes.affirmative": observed.affirmative,
                    "votes.negative": observed.negative,
                },
                doc! { "$set": {
                    "votes.affirmative": stored.affirmative,
                    "votes.negative": stored.negative,
                    "metadata.updated_at": DateTime::now(),
                }},
            )
            .session(&mut *session)
            .await
            .map_err(classify_error)?;

        if result.matched_count == 0 {
            return Err(AttemptError::Conflict("tally changed".into()));
        }

        Ok(LedgerCommit {
            plan,
            tally: next.tally,
            clamped: next.clamped,
        })
    }

    /// Commit, re-committing while the outcome is unknown
    async fn commit(session: &mut ClientSession) -> std::result::Result<(), AttemptError> {
        let mut attempts = 0;
        loop {
            match session.commit_transaction().await {
                Ok(()) => return Ok(()),
                Err(e)
                    if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                        && attempts < COMMIT_RETRIES =>
                {
                    attempts += 1;
                    warn!(attempt = attempts, "Commit result unknown, retrying commit: {}", e);
                }
                Err(e) => return Err(classify_error(e)),
            }
        }
    }
}

fn choice_bson(choice: VoteChoice) -> bson::Bson {
    bson::Bson::String(choice.as_str().to_string())
}

/// Server error code carried by a command or write error
fn server_code(err: &mongodb::error::Error) -> Option<i32> {
    use mongodb::error::{ErrorKind, WriteFailure};

    match err.kind.as_ref() {
        ErrorKind::Command(e) => Some(e.code),
        ErrorKind::Write(WriteFailure::WriteError(e)) => Some(e.code),
        _ => None,
    }
}

/// Whether a failed attempt lost a race and may be retried
///
/// A concurrent first vote from the same voter trips the unique index.
fn is_conflict(code: Option<i32>, transient: bool) -> bool {
    transient || matches!(code, Some(WRITE_CONFLICT) | Some(DUPLICATE_KEY))
}

/// Map a driver error to retryable conflict or hard failure
fn classify_error(err: mongodb::error::Error) -> AttemptError {
    if is_conflict(server_code(&err), err.contains_label(TRANSIENT_TRANSACTION_ERROR)) {
        AttemptError::Conflict(err.to_string())
    } else {
        AttemptError::Failed(ReclaimError::Storage(err.to_string()))
    }
}

#[async_trait]
impl RecordStore for MongoStore {
    async fn insert_record(&self, record: AnalysisRecord) -> Result<InsertOutcome> {
        let doc = AnalysisDoc::from_record(&record)?;

        match self.records.insert_one(doc).await {
            Ok(()) => Ok(InsertOutcome::Created(record.id)),
            Err(e) if is_duplicate_key(&e) => {
                let existing = self
                    .records
                    .find_one(doc! { "idempotency_key": record.idempotency_key.as_str() })
                    .await?
                    .and_then(|d| d._id)
                    .ok_or_else(|| {
                        ReclaimError::Storage(format!(
                            "Duplicate key for {} but no existing record",
                            record.idempotency_key
                        ))
                    })?;
                debug!(record_id = %existing, "Submission already recorded");
                Ok(InsertOutcome::Duplicate(existing.to_hex()))
            }
            Err(e) => Err(ReclaimError::Storage(format!("Insert failed: {}", e))),
        }
    }

    async fn get_record(&self, id: &str) -> Result<Option<AnalysisRecord>> {
        let oid = Self::parse_id(id)?;
        self.records
            .find_one(doc! { "_id": oid })
            .await?
            .map(AnalysisDoc::into_record)
            .transpose()
    }

    async fn find_records(&self, filter: &RecordFilter) -> Result<Vec<AnalysisRecord>> {
        let docs = self
            .records
            .find_many(
                Self::filter_document(filter),
                doc! { "created_at": -1, "_id": -1 },
                filter.effective_limit() as i64,
            )
            .await?;

        docs.into_iter().map(AnalysisDoc::into_record).collect()
    }
}

#[async_trait]
impl AtomicLedger for MongoStore {
    async fn apply_vote(
        &self,
        mutation: &LedgerMutation,
    ) -> std::result::Result<LedgerCommit, AttemptError> {
        let record_id = Self::parse_id(&mutation.record_id)?;

        let mut session = self
            .client
            .inner()
            .start_session()
            .await
            .map_err(|e| AttemptError::Failed(ReclaimError::Storage(e.to_string())))?;

        session.start_transaction().await.map_err(classify_error)?;

        match self.vote_in_session(&mut session, record_id, mutation).await {
            Ok(commit) if commit.plan == LedgerPlan::Unchanged => {
                // Nothing written; release the snapshot
                if let Err(abort_err) = session.abort_transaction().await {
                    debug!("Abort after unchanged ledger attempt: {}", abort_err);
                }
                Ok(commit)
            }
            Ok(commit) => {
                Self::commit(&mut session).await?;
                Ok(commit)
            }
            Err(e) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    debug!("Abort after failed ledger attempt: {}", abort_err);
                }
                Err(e)
            }
        }
    }

    async fn get_vote(&self, record_id: &str, voter_id: &str) -> Result<Option<VoteEntry>> {
        let oid = Self::parse_id(record_id)?;
        Ok(self
            .votes
            .find_one(VoteDoc::key_filter(oid, voter_id))
            .await?
            .map(VoteDoc::into_entry))
    }

    async fn count_votes(&self, record_id: &str) -> Result<Tally> {
        let oid = Self::parse_id(record_id)?;
        let mut tally = Tally::default();

        for choice in [VoteChoice::Affirmative, VoteChoice::Negative] {
            let count = self
                .votes
                .inner()
                .count_documents(doc! { "record_id": oid, "vote": choice_bson(choice) })
                .await?;
            match choice {
                VoteChoice::Affirmative => tally.affirmative = count,
                VoteChoice::Negative => tally.negative = count,
            }
        }

        Ok(tally)
    }
}
