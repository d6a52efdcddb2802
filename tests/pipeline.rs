//! Submission to record to votes, through the library seams

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

use reclaim::cache::{AggregateCache, DEFAULT_TTL};
use reclaim::classifier::{ScriptedClassifier, ScriptedOutcome};
use reclaim::kv::MemoryKv;
use reclaim::limiter::{RateLimitConfig, RateLimiter};
use reclaim::models::{RecordFilter, Tally, Verdict, VoteChoice};
use reclaim::queries::LogQueryService;
use reclaim::store::{MemoryStore, RecordStore};
use reclaim::worker::{Disposition, HandlerConfig, SubmissionHandler};
use reclaim::{LedgerConfig, ReclaimError, VoteLedger};

fn objectification_verdict() -> Verdict {
    Verdict {
        severity_score: 0.8,
        explanation: "Reduces a person to a single use".into(),
        counter_responses: vec![
            "People are more than one thing.".into(),
            "That says more about the speaker.".into(),
        ],
        tags: ["objectification".to_string()].into_iter().collect(),
    }
}

fn submission_payload(text: &str, submitter: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "text": text,
        "submitterId": submitter,
    }))
    .unwrap()
}

#[tokio::test]
async fn test_submission_classified_stored_and_voted() {
    let store = Arc::new(MemoryStore::new());
    let handler = SubmissionHandler::new(
        Arc::new(ScriptedClassifier::always(objectification_verdict())),
        store.clone(),
        HandlerConfig::default(),
    );

    let payload = submission_payload("X is only good for one thing", "submitter-1");
    assert_eq!(handler.handle(&payload, Utc::now(), 1).await, Disposition::Ack);

    let records = store.find_records(&RecordFilter::default()).await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.votes, Tally::new(0, 0));
    assert_eq!(record.severity_score, 0.8);
    assert_eq!(record.counter_responses.len(), 2);

    let ledger = VoteLedger::new(store.clone(), LedgerConfig::default());

    let r = ledger.cast(&record.id, "u1", VoteChoice::Affirmative).await.unwrap();
    assert_eq!(r.tally, Tally::new(1, 0));

    let r = ledger.cast(&record.id, "u1", VoteChoice::Negative).await.unwrap();
    assert_eq!(r.tally, Tally::new(0, 1));

    let r = ledger.retract(&record.id, "u1").await.unwrap();
    assert_eq!(r.tally, Tally::new(0, 0));

    let stored = store.get_record(&record.id).await.unwrap().unwrap();
    assert_eq!(stored.votes, Tally::new(0, 0));
}

#[tokio::test]
async fn test_malformed_classifier_answer_is_nacked_not_stored() {
    let store = Arc::new(MemoryStore::new());
    let classifier = Arc::new(ScriptedClassifier::with_fallback(ScriptedOutcome::Format(
        "classifier answer is not JSON".into(),
    )));
    let handler = SubmissionHandler::new(classifier.clone(), store.clone(), HandlerConfig::default());

    let payload = submission_payload("some comment", "submitter-1");
    assert_eq!(handler.handle(&payload, Utc::now(), 1).await, Disposition::Nak);
    assert_eq!(store.record_count().await, 0);
    assert_eq!(classifier.call_count(), 1);
}

#[tokio::test]
async fn test_duplicate_delivery_creates_one_record() {
    let store = Arc::new(MemoryStore::new());
    let classifier = Arc::new(ScriptedClassifier::always(objectification_verdict()));

    // Two workers competing for the same queue
    let a = SubmissionHandler::new(classifier.clone(), store.clone(), HandlerConfig::default());
    let b = SubmissionHandler::new(classifier.clone(), store.clone(), HandlerConfig::default());

    let payload = submission_payload("same text", "submitter-1");
    let published = Utc::now();

    let (first, second) = tokio::join!(
        a.handle(&payload, published, 1),
        b.handle(&payload, published, 2)
    );
    assert_eq!(first, Disposition::Ack);
    assert_eq!(second, Disposition::Ack);
    assert_eq!(store.record_count().await, 1);
    assert_eq!(classifier.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reads_are_rate_limited_and_cached() {
    let store = Arc::new(MemoryStore::new());
    let handler = SubmissionHandler::new(
        Arc::new(ScriptedClassifier::always(objectification_verdict())),
        store.clone(),
        HandlerConfig::default(),
    );
    handler
        .handle(&submission_payload("first", "s1"), Utc::now(), 1)
        .await;

    let kv = Arc::new(MemoryKv::new());
    let limiter = Arc::new(RateLimiter::new(kv.clone(), RateLimitConfig::default()));
    let queries = LogQueryService::new(store.clone(), limiter, AggregateCache::new(kv, DEFAULT_TTL));

    for _ in 0..10 {
        let records = queries.list("203.0.113.9", RecordFilter::default()).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    let err = queries
        .list("203.0.113.9", RecordFilter::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReclaimError::RateLimitExceeded { limit: 10, .. }));

    tokio::time::advance(Duration::from_secs(60)).await;
    assert_ok!(queries.list("203.0.113.9", RecordFilter::default()).await);
}
