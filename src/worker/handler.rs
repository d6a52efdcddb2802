//! Per-message analysis logic
//!
//! Decoupled from JetStream: takes the raw payload and the time the message
//! entered the stream, returns what should happen to the message.

use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::classifier::Classifier;
use crate::models::{AnalysisRecord, InsertOutcome, Submission};
use crate::store::RecordStore;
use crate::types::ReclaimError;

/// What to tell the queue about a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Processed (or already processed); remove from the queue
    Ack,
    /// Failed in a way a redelivery may fix
    Nak,
    /// Can never succeed; stop redelivering
    Term,
    /// Fatal to this consumer; nak the message and stop consuming
    Halt(String),
}

impl Disposition {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Nak => "nak",
            Self::Term => "term",
            Self::Halt(_) => "halt",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Upper bound on the record write
    pub storage_timeout: Duration,
    /// Width of the submission time bucket in idempotency keys
    pub idempotency_bucket_secs: u64,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            storage_timeout: Duration::from_secs(10),
            idempotency_bucket_secs: 3600,
        }
    }
}

/// Classifies one submission and persists the record
#[derive(Clone)]
pub struct SubmissionHandler {
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn RecordStore>,
    config: HandlerConfig,
}

impl SubmissionHandler {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        store: Arc<dyn RecordStore>,
        config: HandlerConfig,
    ) -> Self {
        Self {
            classifier,
            store,
            config,
        }
    }

    /// Process one queue payload
    ///
    /// `published_at` is the stream timestamp, used for the idempotency key
    /// when the submission carries no `submittedAt`. Redeliveries share it.
    pub async fn handle(&self, payload: &[u8], published_at: DateTime<Utc>, delivery: i64) -> Disposition {
        let submission: Submission = match serde_json::from_slice(payload) {
            Ok(s) => s,
            Err(e) => {
                warn!(delivery, "Terminating undecodable analysis request: {}", e);
                return Disposition::Term;
            }
        };

        if let Err(e) = submission.validate() {
            warn!(
                delivery,
                submitter_id = %submission.submitter_id,
                "Terminating invalid analysis request: {}",
                e
            );
            return Disposition::Term;
        }

        let idempotency_key =
            submission.idempotency_key(published_at, self.config.idempotency_bucket_secs);

        debug!(
            submitter_id = %submission.submitter_id,
            delivery,
            classifier = self.classifier.id(),
            "Classifying submission"
        );

        let verdict = match self.classifier.classify(&submission.text).await {
            Ok(v) => v,
            Err(e) => return self.failure("classification", &submission, delivery, e),
        };

        let record = AnalysisRecord::from_verdict(
            ObjectId::new().to_hex(),
            idempotency_key,
            &submission,
            verdict,
            Utc::now(),
        );

        let outcome = match tokio::time::timeout(
            self.config.storage_timeout,
            self.store.insert_record(record),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => return self.failure("storage", &submission, delivery, e),
            Err(_) => {
                let e = ReclaimError::Storage(format!(
                    "Record write timed out after {:?}",
                    self.config.storage_timeout
                ));
                return self.failure("storage", &submission, delivery, e);
            }
        };

        match outcome {
            InsertOutcome::Created(id) => info!(
                record_id = %id,
                submitter_id = %submission.submitter_id,
                delivery,
                "Analysis record created"
            ),
            InsertOutcome::Duplicate(id) => info!(
                record_id = %id,
                submitter_id = %submission.submitter_id,
                delivery,
                "Submission already recorded, acknowledging redelivery"
            ),
        }

        Disposition::Ack
    }

    fn failure(&self, stage: &str, submission: &Submission, delivery: i64, e: ReclaimError) -> Disposition {
        if e.is_fatal() {
            error!(
                stage,
                submitter_id = %submission.submitter_id,
                error_kind = e.kind(),
                delivery,
                "Fatal error, halting consumer: {}",
                e
            );
            return Disposition::Halt(e.to_string());
        }

        warn!(
            stage,
            submitter_id = %submission.submitter_id,
            error_kind = e.kind(),
            delivery,
            "Analysis failed, message will be redelivered: {}",
            e
        );
        Disposition::Nak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ScriptedClassifier, ScriptedOutcome};
    use crate::models::{RecordFilter, Verdict};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    fn verdict() -> Verdict {
        Verdict {
            severity_score: 0.8,
            explanation: "Reduces a person to one attribute".into(),
            counter_responses: vec!["People are more than that".into()],
            tags: ["objectification".to_string()].into_iter().collect(),
        }
    }

    fn handler(classifier: ScriptedClassifier) -> (Arc<MemoryStore>, SubmissionHandler) {
        let store = Arc::new(MemoryStore::new());
        let handler = SubmissionHandler::new(
            Arc::new(classifier),
            store.clone(),
            HandlerConfig::default(),
        );
        (store, handler)
    }

    const PAYLOAD: &[u8] = br#"{"text":"X is only good for one thing","submitterId":"u1"}"#;

    #[tokio::test]
    async fn test_success_creates_record_with_empty_tally() {
        let (store, handler) = handler(ScriptedClassifier::always(verdict()));

        let disposition = handler.handle(PAYLOAD, Utc::now(), 1).await;
        assert_eq!(disposition, Disposition::Ack);

        let records = store.find_records(&RecordFilter::default()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].votes.total(), 0);
        assert_eq!(records[0].submitter_id, "u1");
        assert!(records[0].tags.contains("objectification"));
    }

    #[tokio::test]
    async fn test_redelivery_acks_without_second_record() {
        let (store, handler) = handler(ScriptedClassifier::always(verdict()));
        let published = Utc::now();

        assert_eq!(handler.handle(PAYLOAD, published, 1).await, Disposition::Ack);
        assert_eq!(handler.handle(PAYLOAD, published, 2).await, Disposition::Ack);
        assert_eq!(store.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_poison_messages_are_terminated() {
        let classifier = ScriptedClassifier::always(verdict());
        let (store, handler) = handler(classifier);

        assert_eq!(handler.handle(b"not json", Utc::now(), 1).await, Disposition::Term);
        assert_eq!(
            handler.handle(br#"{"text":"","submitterId":"u1"}"#, Utc::now(), 1).await,
            Disposition::Term
        );
        assert_eq!(
            handler.handle(br#"{"text":"hello"}"#, Utc::now(), 1).await,
            Disposition::Term
        );
        assert_eq!(store.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_retryable_failures_nak() {
        let classifier = ScriptedClassifier::with_fallback(ScriptedOutcome::Verdict(verdict()))
            .then(ScriptedOutcome::Format("not JSON".into()))
            .then(ScriptedOutcome::Transport("connection reset".into()));
        let (store, handler) = handler(classifier);

        assert_eq!(handler.handle(PAYLOAD, Utc::now(), 1).await, Disposition::Nak);
        assert_eq!(handler.handle(PAYLOAD, Utc::now(), 2).await, Disposition::Nak);
        assert_eq!(store.record_count().await, 0);

        assert_eq!(handler.handle(PAYLOAD, Utc::now(), 3).await, Disposition::Ack);
        assert_eq!(store.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_missing_credentials_halt() {
        let classifier = ScriptedClassifier::with_fallback(ScriptedOutcome::Config(
            "GROQ_API_KEY is not set".into(),
        ));
        let (_, handler) = handler(classifier);

        match handler.handle(PAYLOAD, Utc::now(), 1).await {
            Disposition::Halt(reason) => assert!(reason.contains("GROQ_API_KEY")),
            other => panic!("unexpected disposition: {:?}", other),
        }
    }

    struct StalledStore;

    #[async_trait]
    impl RecordStore for StalledStore {
        async fn insert_record(&self, _record: AnalysisRecord) -> crate::types::Result<InsertOutcome> {
            std::future::pending().await
        }

        async fn get_record(&self, _id: &str) -> crate::types::Result<Option<AnalysisRecord>> {
            Ok(None)
        }

        async fn find_records(&self, _filter: &RecordFilter) -> crate::types::Result<Vec<AnalysisRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_storage_times_out_and_naks() {
        let handler = SubmissionHandler::new(
            Arc::new(ScriptedClassifier::always(verdict())),
            Arc::new(StalledStore),
            HandlerConfig {
                storage_timeout: Duration::from_millis(500),
                ..Default::default()
            },
        );

        assert_eq!(handler.handle(PAYLOAD, Utc::now(), 1).await, Disposition::Nak);
    }
}
