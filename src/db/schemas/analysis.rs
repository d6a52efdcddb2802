//! Analysis record document schema
//!
//! One document per classified submission. Only `votes` changes after
//! insert, and only through the vote ledger.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::models::{AnalysisRecord, Tally};
use crate::types::ReclaimError;

/// Collection name for analysis records
pub const ANALYSIS_COLLECTION: &str = "logs";

/// Classifier output as stored
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AiAnalysis {
    pub severity_score: f64,
    #[serde(default)]
    pub counter_responses: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Stored tally; signed so a corrupted negative value still deserializes
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct VoteCounts {
    #[serde(default)]
    pub affirmative: i64,
    #[serde(default)]
    pub negative: i64,
}

impl From<Tally> for VoteCounts {
    fn from(t: Tally) -> Self {
        Self {
            affirmative: t.affirmative as i64,
            negative: t.negative as i64,
        }
    }
}

impl From<VoteCounts> for Tally {
    fn from(c: VoteCounts) -> Self {
        Tally::new(c.affirmative.max(0) as u64, c.negative.max(0) as u64)
    }
}

/// Analysis document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AnalysisDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Deduplicates redelivered submissions
    pub idempotency_key: String,

    /// Original submitted text
    pub text: String,

    /// Why the text was (or was not) judged harmful
    pub explanation: String,

    /// Classifier output
    pub ai_analysis: AiAnalysis,

    /// Top-level copy of the tags for indexed filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// Community vote tally
    #[serde(default)]
    pub votes: VoteCounts,

    /// When the record was created
    pub created_at: DateTime,

    /// Submitter identity
    pub submitter_id: String,
}

impl AnalysisDoc {
    /// Build a document from a domain record
    pub fn from_record(record: &AnalysisRecord) -> Result<Self, ReclaimError> {
        let id = ObjectId::parse_str(&record.id)?;
        let tags: Vec<String> = record.tags.iter().cloned().collect();

        Ok(Self {
            _id: Some(id),
            metadata: Metadata::new(),
            idempotency_key: record.idempotency_key.clone(),
            text: record.text.clone(),
            explanation: record.explanation.clone(),
            ai_analysis: AiAnalysis {
                severity_score: record.severity_score,
                counter_responses: record.counter_responses.clone(),
                tags: tags.clone(),
            },
            tags,
            votes: record.votes.into(),
            created_at: DateTime::from_chrono(record.created_at),
            submitter_id: record.submitter_id.clone(),
        })
    }

    /// Convert to the domain record
    pub fn into_record(self) -> Result<AnalysisRecord, ReclaimError> {
        let id = self
            ._id
            .ok_or_else(|| ReclaimError::Storage("Analysis document without _id".into()))?;

        Ok(AnalysisRecord {
            id: id.to_hex(),
            idempotency_key: self.idempotency_key,
            text: self.text,
            explanation: self.explanation,
            severity_score: self.ai_analysis.severity_score,
            counter_responses: self.ai_analysis.counter_responses,
            tags: self.tags.into_iter().collect(),
            votes: self.votes.into(),
            created_at: self.created_at.to_chrono(),
            submitter_id: self.submitter_id,
        })
    }
}

impl IntoIndexes for AnalysisDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Redelivered submissions collapse onto one record
            (
                doc! { "idempotency_key": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("idempotency_key_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("created_at_desc".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "tags": 1, "created_at": -1 },
                Some(IndexOptions::builder().name("tags_index".to_string()).build()),
            ),
            (
                doc! { "submitter_id": 1, "created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("submitter_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for AnalysisDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
