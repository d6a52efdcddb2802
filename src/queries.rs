//! Read flow for analysis records
//!
//! Every read is admitted by the rate limiter first. Listings are then
//! served from the aggregate cache when possible and fall back to the record
//! store, refilling the cache. Single-record reads skip the cache.

use std::sync::Arc;
use tracing::debug;

use crate::cache::{filter_key, AggregateCache};
use crate::limiter::RateLimiter;
use crate::models::{AnalysisRecord, RecordFilter, DEFAULT_QUERY_LIMIT};
use crate::store::RecordStore;
use crate::types::{ReclaimError, Result};

pub struct LogQueryService {
    store: Arc<dyn RecordStore>,
    limiter: Arc<RateLimiter>,
    cache: AggregateCache,
    max_limit: usize,
}

impl LogQueryService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        limiter: Arc<RateLimiter>,
        cache: AggregateCache,
    ) -> Self {
        Self {
            store,
            limiter,
            cache,
            max_limit: DEFAULT_QUERY_LIMIT,
        }
    }

    /// Cap on the page size a caller may request
    pub fn with_max_limit(mut self, max_limit: usize) -> Self {
        self.max_limit = max_limit.max(1);
        self
    }

    /// Records matching `filter`, newest first
    pub async fn list(&self, client_key: &str, filter: RecordFilter) -> Result<Vec<AnalysisRecord>> {
        self.limiter.check(client_key).await?;

        let filter = self.bounded(filter)?;
        let key = filter_key(&filter);

        if let Some(records) = self.cache.get::<Vec<AnalysisRecord>>(&key).await {
            debug!(key = %key, count = records.len(), "Serving listing from cache");
            return Ok(records);
        }

        let records = self.store.find_records(&filter).await?;
        self.cache.set(&key, &records).await;

        debug!(key = %key, count = records.len(), "Serving listing from store");
        Ok(records)
    }

    /// One record by id
    pub async fn get(&self, client_key: &str, id: &str) -> Result<AnalysisRecord> {
        self.limiter.check(client_key).await?;

        let id = id.trim();
        if id.is_empty() {
            return Err(ReclaimError::BadRequest("Missing record id".into()));
        }

        self.store
            .get_record(id)
            .await?
            .ok_or_else(|| ReclaimError::NotFound(format!("Record {} not found", id)))
    }

    fn bounded(&self, mut filter: RecordFilter) -> Result<RecordFilter> {
        if let Some(min) = filter.min_severity {
            if !(0.0..=1.0).contains(&min) {
                return Err(ReclaimError::BadRequest(format!(
                    "minSeverity must be within [0, 1], got {}",
                    min
                )));
            }
        }
        if let (Some(since), Some(until)) = (filter.since, filter.until) {
            if since >= until {
                return Err(ReclaimError::BadRequest(
                    "since must be earlier than until".into(),
                ));
            }
        }
        if let Some(tag) = filter.tag.take() {
            let tag = tag.trim().to_lowercase();
            filter.tag = (!tag.is_empty()).then_some(tag);
        }
        filter.limit = filter.limit.map(|l| l.clamp(1, self.max_limit));
        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DEFAULT_TTL;
    use crate::kv::MemoryKv;
    use crate::limiter::RateLimitConfig;
    use crate::models::Tally;
    use crate::store::MemoryStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;

    fn record(id: &str, tag: &str, minutes_ago: i64) -> AnalysisRecord {
        AnalysisRecord {
            id: id.into(),
            idempotency_key: format!("key-{}", id),
            text: format!("text {}", id),
            explanation: "explanation".into(),
            severity_score: 0.6,
            counter_responses: vec![],
            tags: [tag.to_string()].into_iter().collect(),
            votes: Tally::default(),
            created_at: Utc::now() - ChronoDuration::minutes(minutes_ago),
            submitter_id: "s1".into(),
        }
    }

    async fn service(limit: u64) -> (Arc<MemoryStore>, LogQueryService) {
        let store = Arc::new(MemoryStore::new());
        let kv = Arc::new(MemoryKv::new());
        let limiter = Arc::new(RateLimiter::new(
            kv.clone(),
            RateLimitConfig {
                limit,
                window: Duration::from_secs(60),
            },
        ));
        let cache = AggregateCache::new(kv, DEFAULT_TTL);
        let service = LogQueryService::new(store.clone(), limiter, cache);
        (store, service)
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_is_cached_until_ttl() {
        let (store, service) = service(100).await;
        store.insert_record(record("a", "stereotype", 2)).await.unwrap();
        store.insert_record(record("b", "objectification", 1)).await.unwrap();

        let first = service.list("ip", RecordFilter::default()).await.unwrap();
        assert_eq!(
            first.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["b", "a"]
        );

        // New record is not visible while the cached listing is fresh
        store.insert_record(record("c", "stereotype", 0)).await.unwrap();
        let cached = service.list("ip", RecordFilter::default()).await.unwrap();
        assert_eq!(cached.len(), 2);

        tokio::time::advance(Duration::from_secs(301)).await;
        let refreshed = service.list("ip", RecordFilter::default()).await.unwrap();
        assert_eq!(refreshed.len(), 3);
        assert_eq!(refreshed[0].id, "c");
    }

    #[tokio::test]
    async fn test_filters_are_cached_separately() {
        let (store, service) = service(100).await;
        store.insert_record(record("a", "stereotype", 2)).await.unwrap();
        store.insert_record(record("b", "objectification", 1)).await.unwrap();

        let tagged = service
            .list(
                "ip",
                RecordFilter {
                    tag: Some(" Stereotype ".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].id, "a");

        let all = service.list("ip", RecordFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_refused_before_touching_store() {
        let (_, service) = service(1).await;
        service.list("ip", RecordFilter::default()).await.unwrap();

        let err = service.list("ip", RecordFilter::default()).await.unwrap_err();
        assert!(matches!(err, ReclaimError::RateLimitExceeded { .. }));

        let err = service.get("ip", "anything").await.unwrap_err();
        assert!(matches!(err, ReclaimError::RateLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn test_get_and_invalid_filters() {
        let (store, service) = service(100).await;
        store.insert_record(record("a", "stereotype", 0)).await.unwrap();

        assert_eq!(service.get("ip", "a").await.unwrap().id, "a");
        assert!(matches!(
            service.get("ip", "zzz").await.unwrap_err(),
            ReclaimError::NotFound(_)
        ));

        let bad = RecordFilter {
            min_severity: Some(1.5),
            ..Default::default()
        };
        assert!(matches!(
            service.list("ip", bad).await.unwrap_err(),
            ReclaimError::BadRequest(_)
        ));
    }
}
