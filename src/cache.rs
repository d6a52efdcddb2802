//! Aggregate read cache
//!
//! Caches the result of listing queries as JSON in the key-value layer.
//! Failures are logged and treated as misses; the cache never fails a read.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::kv::KvStore;
use crate::models::RecordFilter;

/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Key of the unfiltered latest-records listing
pub const TRENDING_KEY: &str = "trending_logs";

/// Storage key for a listing filter
///
/// The unfiltered view gets a fixed key; every other filter is hashed.
pub fn filter_key(filter: &RecordFilter) -> String {
    if filter.is_trending() && filter.limit.is_none() {
        return TRENDING_KEY.to_string();
    }

    let canonical = serde_json::to_string(filter).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hasher.finalize();
    format!("logs:{}", hex::encode(&hash[..8]))
}

pub struct AggregateCache {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl AggregateCache {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Cached value, or `None` on miss or any cache failure
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.kv.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key, "Cache miss");
                return None;
            }
            Err(e) => {
                warn!(key, error_kind = e.kind(), "Cache read failed: {}", e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, "Dropping undecodable cache entry: {}", e);
                if let Err(e) = self.kv.delete(key).await {
                    warn!(key, "Cache delete failed: {}", e);
                }
                None
            }
        }
    }

    /// Store a value; failures are logged and ignored
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, "Cache encode failed: {}", e);
                return;
            }
        };

        if let Err(e) = self.kv.set_ex(key, raw, self.ttl).await {
            warn!(key, error_kind = e.kind(), "Cache write failed: {}", e);
        }
    }
}
