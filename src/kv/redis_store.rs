//! Redis key-value store
//!
//! Shared across every process, so limits hold across horizontally scaled
//! readers. The window increment runs as a Lua script: INCR and PEXPIRE
//! commit together, and a counter left without a TTL is re-armed.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use tracing::info;

use super::{KvStore, WindowCount};
use crate::types::{ReclaimError, Result};

const INCR_WINDOW_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {current, ttl}
"#;

/// Redis-backed key-value store
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
    incr_window: Script,
}

impl RedisKv {
    /// Connect to Redis, bounded by `timeout`
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        info!("Connecting to Redis");

        let client = redis::Client::open(url)
            .map_err(|e| ReclaimError::Config(format!("Invalid REDIS_URL: {}", e)))?;

        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| ReclaimError::Cache(format!("Redis connect timed out after {:?}", timeout)))?
            .map_err(|e| ReclaimError::Cache(format!("Failed to connect to Redis: {}", e)))?;

        info!("Connected to Redis");

        Ok(Self {
            conn,
            incr_window: Script::new(INCR_WINDOW_SCRIPT),
        })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn incr_window(&self, key: &str, window: Duration) -> Result<WindowCount> {
        let window_ms = window.as_millis() as u64;
        if window_ms == 0 {
            return Err(ReclaimError::Config("rate window must be positive".into()));
        }

        let mut conn = self.conn.clone();
        let (count, ttl_ms): (u64, i64) = self
            .incr_window
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(WindowCount {
            count,
            resets_in: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Live behaviour needs a Redis server; the script is checked for the
    // pieces the window semantics depend on.

    #[test]
    fn test_script_arms_expiry_on_first_increment() {
        assert!(INCR_WINDOW_SCRIPT.contains("if current == 1 then"));
        assert!(INCR_WINDOW_SCRIPT.contains("PEXPIRE"));
        assert_eq!(Script::new(INCR_WINDOW_SCRIPT).get_hash().len(), 40);
    }

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        let err = RedisKv::connect("not a url", Duration::from_millis(100))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ReclaimError::Config(_)));
    }
}
