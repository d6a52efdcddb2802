//! In-process key-value store
//!
//! DashMap with per-entry expiry. Each key's shard lock makes the
//! increment-and-arm step atomic. Uses `tokio::time::Instant` so paused-clock
//! tests can step through windows.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::{KvStore, WindowCount};
use crate::types::{ReclaimError, Result};

/// Purge expired entries every this many writes
const PURGE_EVERY: u64 = 1024;

#[derive(Debug, Clone)]
enum MemValue {
    Counter(u64),
    Text(String),
}

#[derive(Debug, Clone)]
struct MemEntry {
    value: MemValue,
    expires_at: Instant,
}

impl MemEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// DashMap-backed key-value store
#[derive(Default)]
pub struct MemoryKv {
    entries: DashMap<String, MemEntry>,
    writes: AtomicU64,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "Purged expired key-value entries");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn note_write(&self) {
        if self.writes.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1 {
            self.purge_expired();
        }
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn incr_window(&self, key: &str, window: Duration) -> Result<WindowCount> {
        if window.is_zero() {
            return Err(ReclaimError::Config("rate window must be positive".into()));
        }

        let now = Instant::now();
        let fresh = || MemEntry {
            value: MemValue::Counter(0),
            expires_at: now + window,
        };

        let result = {
            let mut slot = self.entries.entry(key.to_string()).or_insert_with(fresh);
            if slot.is_expired(now) || !matches!(slot.value, MemValue::Counter(_)) {
                *slot = fresh();
            }

            let count = match &mut slot.value {
                MemValue::Counter(c) => {
                    *c += 1;
                    *c
                }
                MemValue::Text(_) => 1,
            };

            WindowCount {
                count,
                resets_in: slot.expires_at.saturating_duration_since(now),
            }
        };

        self.note_write();
        Ok(result)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                MemValue::Text(s) => Some(s.clone()),
                MemValue::Counter(c) => Some(c.to_string()),
            },
            _ => None,
        };
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            MemEntry {
                value: MemValue::Text(value),
                expires_at: Instant::now() + ttl,
            },
        );
        self.note_write();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_counter_resets_after_window() {
        let kv = MemoryKv::new();
        let window = Duration::from_secs(60);

        assert_eq!(kv.incr_window("k", window).await.unwrap().count, 1);
        assert_eq!(kv.incr_window("k", window).await.unwrap().count, 2);

        tokio::time::advance(Duration::from_secs(30)).await;
        let mid = kv.incr_window("k", window).await.unwrap();
        assert_eq!(mid.count, 3);
        assert_eq!(mid.resets_in, Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(kv.incr_window("k", window).await.unwrap().count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_ex_expires() {
        let kv = MemoryKv::new();
        kv.set_ex("c", "payload".into(), Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(kv.get("c").await.unwrap().as_deref(), Some("payload"));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(kv.get("c").await.unwrap(), None);

        kv.purge_expired();
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let kv = std::sync::Arc::new(MemoryKv::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let kv = kv.clone();
            handles.push(tokio::spawn(async move {
                kv.incr_window("hot", Duration::from_secs(60)).await.unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(kv.get("hot").await.unwrap().as_deref(), Some("50"));
    }
}
