//! Fast key-value layer
//!
//! Backs the fixed-window rate limiter and the aggregate read cache.
//! Counters are only ever changed through `incr_window`, which increments
//! and arms the window expiry in one atomic step.

use async_trait::async_trait;
use std::time::Duration;

use crate::types::Result;

pub mod memory;
pub mod redis_store;

pub use memory::MemoryKv;
pub use redis_store::RedisKv;

/// Counter value after an increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    /// Time until the window resets
    pub resets_in: Duration,
}

/// Key-value operations used by the limiter and the cache
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically increment `key`; the first increment of a window sets the
    /// expiry to `window`.
    async fn incr_window(&self, key: &str, window: Duration) -> Result<WindowCount>;

    /// Read a string value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a string value with a time-to-live
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Remove a key
    async fn delete(&self, key: &str) -> Result<()>;
}
