//! Tally consistency under random and concurrent vote traffic

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reclaim::models::{AnalysisRecord, Tally, VoteChoice};
use reclaim::store::{MemoryStore, RecordStore};
use reclaim::{LedgerConfig, VoteLedger};

fn record(id: &str) -> AnalysisRecord {
    AnalysisRecord {
        id: id.into(),
        idempotency_key: format!("key-{}", id),
        text: "comment".into(),
        explanation: "explanation".into(),
        severity_score: 0.3,
        counter_responses: vec![],
        tags: Default::default(),
        votes: Tally::default(),
        created_at: Utc::now(),
        submitter_id: "submitter".into(),
    }
}

fn contended_config() -> LedgerConfig {
    LedgerConfig {
        max_attempts: 500,
        base_backoff: Duration::from_micros(20),
        attempt_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_tally_counts_voters_whose_last_action_was_a_cast() {
    for _ in 0..10 {
        let store = Arc::new(MemoryStore::new());
        store.insert_record(record("r")).await.unwrap();
        let ledger = VoteLedger::new(store.clone(), LedgerConfig::default());

        let mut rng = rand::thread_rng();
        let mut expected: HashMap<String, Option<VoteChoice>> = HashMap::new();

        for _ in 0..200 {
            let voter = format!("v{}", rng.gen_range(0..12));
            match rng.gen_range(0..3) {
                0 => {
                    ledger.cast("r", &voter, VoteChoice::Affirmative).await.unwrap();
                    expected.insert(voter, Some(VoteChoice::Affirmative));
                }
                1 => {
                    ledger.cast("r", &voter, VoteChoice::Negative).await.unwrap();
                    expected.insert(voter, Some(VoteChoice::Negative));
                }
                _ => {
                    ledger.retract("r", &voter).await.unwrap();
                    expected.insert(voter, None);
                }
            }
        }

        let affirmative = expected
            .values()
            .filter(|v| **v == Some(VoteChoice::Affirmative))
            .count() as u64;
        let negative = expected
            .values()
            .filter(|v| **v == Some(VoteChoice::Negative))
            .count() as u64;

        let stored = store.get_record("r").await.unwrap().unwrap();
        assert_eq!(stored.votes, Tally::new(affirmative, negative));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_casts_lose_no_updates() {
    for round in 0..5 {
        let store = Arc::new(MemoryStore::new());
        store.insert_record(record("r")).await.unwrap();
        let ledger = VoteLedger::new(store.clone(), contended_config());

        let m = 64u64;
        let mut voters: Vec<u64> = (0..m).collect();
        voters.shuffle(&mut rand::thread_rng());

        let handles: Vec<_> = voters
            .into_iter()
            .map(|i| {
                let ledger = ledger.clone();
                let choice = if i % 2 == 0 {
                    VoteChoice::Affirmative
                } else {
                    VoteChoice::Negative
                };
                tokio::spawn(async move { ledger.cast("r", &format!("voter-{}", i), choice).await })
            })
            .collect();

        for h in handles {
            h.await.unwrap().unwrap();
        }

        let stored = store.get_record("r").await.unwrap().unwrap();
        assert_eq!(stored.votes.total(), m, "round {}", round);
        assert_eq!(stored.votes, Tally::new(m / 2, m / 2));
        assert_eq!(ledger.recount("r").await.unwrap(), stored.votes);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_switches_by_one_voter_never_double_count() {
    let store = Arc::new(MemoryStore::new());
    store.insert_record(record("r")).await.unwrap();
    let ledger = VoteLedger::new(store.clone(), contended_config());

    let handles: Vec<_> = (0..40)
        .map(|i| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                match i % 3 {
                    0 => ledger.cast("r", "same-voter", VoteChoice::Affirmative).await,
                    1 => ledger.cast("r", "same-voter", VoteChoice::Negative).await,
                    _ => ledger.retract("r", "same-voter").await,
                }
            })
        })
        .collect();

    for h in handles {
        h.await.unwrap().unwrap();
    }

    let stored = store.get_record("r").await.unwrap().unwrap();
    assert!(stored.votes.total() <= 1);
    assert_eq!(ledger.recount("r").await.unwrap(), stored.votes);
    match ledger.current_vote("r", "same-voter").await.unwrap() {
        Some(entry) => assert_eq!(stored.votes.get(entry.vote), 1),
        None => assert_eq!(stored.votes, Tally::default()),
    }
}
