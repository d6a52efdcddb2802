//! Vote entry document schema
//!
//! At most one document per (record, voter), enforced by a unique index.
//! Retracting a vote deletes the document.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::models::{VoteChoice, VoteEntry};

/// Collection name for vote entries
pub const VOTE_COLLECTION: &str = "votes";

/// Vote document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct VoteDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Record being voted on
    pub record_id: ObjectId,

    /// Voter identity
    pub voter_id: String,

    /// Current vote
    pub vote: VoteChoice,

    /// Last time the vote was cast or changed
    pub updated_at: DateTime,
}

impl VoteDoc {
    /// Create a new vote document
    pub fn new(record_id: ObjectId, voter_id: &str, vote: VoteChoice) -> Self {
        let now = DateTime::now();
        Self {
            _id: None,
            metadata: Metadata::new(),
            record_id,
            voter_id: voter_id.to_string(),
            vote,
            updated_at: now,
        }
    }

    /// Filter selecting the entry for (record, voter)
    pub fn key_filter(record_id: ObjectId, voter_id: &str) -> Document {
        doc! { "record_id": record_id, "voter_id": voter_id }
    }

    /// Convert to the domain entry
    pub fn into_entry(self) -> VoteEntry {
        VoteEntry {
            record_id: self.record_id.to_hex(),
            voter_id: self.voter_id,
            vote: self.vote,
            updated_at: self.updated_at.to_chrono(),
        }
    }
}

impl IntoIndexes for VoteDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "record_id": 1, "voter_id": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("record_voter_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for VoteDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
