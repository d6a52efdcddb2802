//! Domain types for analysis records and the vote ledger
//!
//! These are storage-agnostic. The MongoDB document shapes live in
//! `db::schemas` and convert to and from these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::types::ReclaimError;

/// Default page size for record listings
pub const DEFAULT_QUERY_LIMIT: usize = 100;

// ============================================================================
// Votes
// ============================================================================

/// One voter's stance on a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VoteChoice {
    #[serde(alias = "sexist")]
    Affirmative,
    #[serde(alias = "notSexist")]
    Negative,
}

impl VoteChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Affirmative => "affirmative",
            Self::Negative => "negative",
        }
    }
}

impl fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteChoice {
    type Err = ReclaimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "affirmative" | "sexist" => Ok(Self::Affirmative),
            "negative" | "notSexist" => Ok(Self::Negative),
            other => Err(ReclaimError::BadRequest(format!(
                "Unknown vote value '{}', expected affirmative or negative",
                other
            ))),
        }
    }
}

/// Aggregate vote counts for one record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    #[serde(default, alias = "sexist")]
    pub affirmative: u64,
    #[serde(default, alias = "notSexist")]
    pub negative: u64,
}

/// Signed change to a tally, produced by a ledger plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TallyDelta {
    pub affirmative: i64,
    pub negative: i64,
}

impl TallyDelta {
    fn bump(&mut self, choice: VoteChoice, by: i64) {
        match choice {
            VoteChoice::Affirmative => self.affirmative += by,
            VoteChoice::Negative => self.negative += by,
        }
    }
}

/// Result of applying a delta with the non-negative floor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClampedTally {
    pub tally: Tally,
    /// Fields whose decrement would have gone below zero
    pub clamped: Vec<VoteChoice>,
}

impl Tally {
    pub fn new(affirmative: u64, negative: u64) -> Self {
        Self {
            affirmative,
            negative,
        }
    }

    pub fn total(&self) -> u64 {
        self.affirmative + self.negative
    }

    pub fn get(&self, choice: VoteChoice) -> u64 {
        match choice {
            VoteChoice::Affirmative => self.affirmative,
            VoteChoice::Negative => self.negative,
        }
    }

    /// Apply a delta, flooring each field at zero
    pub fn apply(&self, delta: TallyDelta) -> ClampedTally {
        let mut clamped = Vec::new();
        let mut floor = |current: u64, change: i64, choice: VoteChoice| -> u64 {
            let next = current as i64 + change;
            if next < 0 {
                clamped.push(choice);
                0
            } else {
                next as u64
            }
        };

        let affirmative = floor(self.affirmative, delta.affirmative, VoteChoice::Affirmative);
        let negative = floor(self.negative, delta.negative, VoteChoice::Negative);

        ClampedTally {
            tally: Tally::new(affirmative, negative),
            clamped,
        }
    }
}

/// A voter's current vote on a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteEntry {
    pub record_id: String,
    pub voter_id: String,
    pub vote: VoteChoice,
    pub updated_at: DateTime<Utc>,
}

/// What a voter asked the ledger to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteIntent {
    Cast(VoteChoice),
    Retract,
}

/// Ledger transition computed from the voter's previous entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerPlan {
    /// First vote from this voter
    Insert(VoteChoice),
    /// Vote changed from one choice to the other
    Switch { from: VoteChoice, to: VoteChoice },
    /// Vote retracted
    Remove(VoteChoice),
    /// Same vote again, or retracting nothing
    Unchanged,
}

impl LedgerPlan {
    /// Decide the transition for `intent` given the previous vote
    pub fn for_intent(previous: Option<VoteChoice>, intent: VoteIntent) -> Self {
        match (previous, intent) {
            (None, VoteIntent::Cast(choice)) => Self::Insert(choice),
            (Some(prev), VoteIntent::Cast(choice)) if prev == choice => Self::Unchanged,
            (Some(prev), VoteIntent::Cast(choice)) => Self::Switch {
                from: prev,
                to: choice,
            },
            (Some(prev), VoteIntent::Retract) => Self::Remove(prev),
            (None, VoteIntent::Retract) => Self::Unchanged,
        }
    }

    pub fn delta(&self) -> TallyDelta {
        let mut delta = TallyDelta::default();
        match *self {
            Self::Insert(choice) => delta.bump(choice, 1),
            Self::Switch { from, to } => {
                delta.bump(from, -1);
                delta.bump(to, 1);
            }
            Self::Remove(choice) => delta.bump(choice, -1),
            Self::Unchanged => {}
        }
        delta
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Switch { .. } => "switch",
            Self::Remove(_) => "remove",
            Self::Unchanged => "unchanged",
        }
    }
}

// ============================================================================
// Analysis records
// ============================================================================

/// Structured classification returned by the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub severity_score: f64,
    pub explanation: String,
    pub counter_responses: Vec<String>,
    pub tags: BTreeSet<String>,
}

/// Persisted outcome of classifying one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub id: String,
    pub idempotency_key: String,
    pub text: String,
    pub explanation: String,
    pub severity_score: f64,
    pub counter_responses: Vec<String>,
    pub tags: BTreeSet<String>,
    pub votes: Tally,
    pub created_at: DateTime<Utc>,
    pub submitter_id: String,
}

impl AnalysisRecord {
    /// Build a fresh record with an empty tally
    pub fn from_verdict(
        id: String,
        idempotency_key: String,
        submission: &Submission,
        verdict: Verdict,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            idempotency_key,
            text: submission.text.clone(),
            explanation: verdict.explanation,
            severity_score: verdict.severity_score,
            counter_responses: verdict.counter_responses,
            tags: verdict.tags,
            votes: Tally::default(),
            created_at,
            submitter_id: submission.submitter_id.clone(),
        }
    }
}

/// Outcome of an idempotent insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Created(String),
    /// A record with the same idempotency key already existed
    Duplicate(String),
}

impl InsertOutcome {
    pub fn record_id(&self) -> &str {
        match self {
            Self::Created(id) | Self::Duplicate(id) => id,
        }
    }
}

// ============================================================================
// Submissions
// ============================================================================

/// Analysis request carried on the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(default)]
    pub text: String,
    #[serde(default, alias = "userId")]
    pub submitter_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn new(text: impl Into<String>, submitter_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            submitter_id: submitter_id.into(),
            submitted_at: None,
        }
    }

    /// Both fields are required and must not be blank
    pub fn validate(&self) -> Result<(), ReclaimError> {
        if self.text.trim().is_empty() {
            return Err(ReclaimError::BadRequest("Missing comment text".into()));
        }
        if self.submitter_id.trim().is_empty() {
            return Err(ReclaimError::BadRequest("Missing submitterId".into()));
        }
        Ok(())
    }

    /// Deterministic key shared by every redelivery of the same submission
    ///
    /// `fallback_at` is used when the publisher did not stamp `submittedAt`.
    pub fn idempotency_key(&self, fallback_at: DateTime<Utc>, bucket_secs: u64) -> String {
        let at = self.submitted_at.unwrap_or(fallback_at);
        let bucket = at.timestamp().div_euclid(bucket_secs.max(1) as i64);

        let mut hasher = Sha256::new();
        hasher.update(self.submitter_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.text.as_bytes());
        hasher.update([0u8]);
        hasher.update(bucket.to_be_bytes());
        hex::encode(hasher.finalize())
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Pass-through predicates for record listings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT).max(1)
    }

    /// True for the unfiltered "latest records" view
    pub fn is_trending(&self) -> bool {
        self.tag.is_none()
            && self.min_severity.is_none()
            && self.submitter_id.is_none()
            && self.since.is_none()
            && self.until.is_none()
    }

    /// In-memory evaluation, mirrors the MongoDB query
    pub fn matches(&self, record: &AnalysisRecord) -> bool {
        if let Some(tag) = &self.tag {
            if !record.tags.contains(tag) {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if record.severity_score < min {
                return false;
            }
        }
        if let Some(submitter) = &self.submitter_id {
            if &record.submitter_id != submitter {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.created_at >= until {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_vote_choice_accepts_legacy_names() {
        let v: VoteChoice = serde_json::from_str("\"sexist\"").unwrap();
        assert_eq!(v, VoteChoice::Affirmative);
        let v: VoteChoice = serde_json::from_str("\"notSexist\"").unwrap();
        assert_eq!(v, VoteChoice::Negative);
        assert_eq!("negative".parse::<VoteChoice>().unwrap(), VoteChoice::Negative);
        assert!("maybe".parse::<VoteChoice>().is_err());
    }

    #[test]
    fn test_plan_transitions() {
        use VoteChoice::*;
        assert_eq!(
            LedgerPlan::for_intent(None, VoteIntent::Cast(Affirmative)),
            LedgerPlan::Insert(Affirmative)
        );
        assert_eq!(
            LedgerPlan::for_intent(Some(Affirmative), VoteIntent::Cast(Affirmative)),
            LedgerPlan::Unchanged
        );
        assert_eq!(
            LedgerPlan::for_intent(Some(Affirmative), VoteIntent::Cast(Negative)),
            LedgerPlan::Switch {
                from: Affirmative,
                to: Negative
            }
        );
        assert_eq!(
            LedgerPlan::for_intent(Some(Negative), VoteIntent::Retract),
            LedgerPlan::Remove(Negative)
        );
        assert_eq!(
            LedgerPlan::for_intent(None, VoteIntent::Retract),
            LedgerPlan::Unchanged
        );
    }

    #[test]
    fn test_switch_delta_moves_one_vote() {
        let plan = LedgerPlan::Switch {
            from: VoteChoice::Affirmative,
            to: VoteChoice::Negative,
        };
        let delta = plan.delta();
        assert_eq!(delta.affirmative, -1);
        assert_eq!(delta.negative, 1);

        let result = Tally::new(1, 0).apply(delta);
        assert_eq!(result.tally, Tally::new(0, 1));
        assert!(result.clamped.is_empty());
    }

    #[test]
    fn test_apply_clamps_at_zero() {
        let delta = LedgerPlan::Remove(VoteChoice::Negative).delta();
        let result = Tally::new(3, 0).apply(delta);
        assert_eq!(result.tally, Tally::new(3, 0));
        assert_eq!(result.clamped, vec![VoteChoice::Negative]);
    }

    #[test]
    fn test_idempotency_key_stable_within_bucket() {
        let mut submission = Submission::new("X is only good for one thing", "u1");
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 5).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 55).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 1, 5).unwrap();

        assert_eq!(submission.idempotency_key(t0, 60), submission.idempotency_key(t1, 60));
        assert_ne!(submission.idempotency_key(t0, 60), submission.idempotency_key(t2, 60));

        // An explicit submittedAt wins over the delivery time
        submission.submitted_at = Some(t0);
        assert_eq!(submission.idempotency_key(t2, 60), submission.idempotency_key(t0, 60));
    }

    #[test]
    fn test_submission_validation() {
        assert!(Submission::new("hello", "u1").validate().is_ok());
        assert!(Submission::new("   ", "u1").validate().is_err());
        assert!(Submission::new("hello", "").validate().is_err());

        let parsed: Submission =
            serde_json::from_str(r#"{"text":"hello","userId":"legacy"}"#).unwrap();
        assert_eq!(parsed.submitter_id, "legacy");
    }

    #[test]
    fn test_filter_matches() {
        let record = AnalysisRecord {
            id: "r1".into(),
            idempotency_key: "k".into(),
            text: "t".into(),
            explanation: "e".into(),
            severity_score: 0.8,
            counter_responses: vec![],
            tags: ["objectification".to_string()].into_iter().collect(),
            votes: Tally::default(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            submitter_id: "u1".into(),
        };

        assert!(RecordFilter::default().matches(&record));
        let by_tag = RecordFilter {
            tag: Some("stereotype".into()),
            ..Default::default()
        };
        assert!(!by_tag.matches(&record));
        let by_score = RecordFilter {
            min_severity: Some(0.9),
            ..Default::default()
        };
        assert!(!by_score.matches(&record));
        let by_submitter = RecordFilter {
            submitter_id: Some("u1".into()),
            ..Default::default()
        };
        assert!(by_submitter.matches(&record));
        assert!(!by_submitter.is_trending());
    }
}
