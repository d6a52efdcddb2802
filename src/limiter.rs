//! Fixed-window rate limiter
//!
//! One counter per client in the key-value layer, keyed `rate_limit:{client}`.
//! The first request of a window arms the counter's expiry; requests past
//! the limit are refused until the counter expires. A refused request still
//! counts, so hammering a closed window does not reopen it early.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::kv::KvStore;
use crate::types::{ReclaimError, Result};

/// Default requests per window
pub const DEFAULT_LIMIT: u64 = 10;
/// Default window length
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub limit: u64,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window: DEFAULT_WINDOW,
        }
    }
}

/// An admitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Requests counted in the current window, this one included
    pub count: u64,
    pub limit: u64,
    pub remaining: u64,
    pub resets_in: Duration,
}

pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, config: RateLimitConfig) -> Self {
        Self { kv, config }
    }

    /// Counter key for a client identity
    pub fn key_for(client_key: &str) -> String {
        format!("rate_limit:{}", client_key)
    }

    /// Check against the configured limit and window
    pub async fn check(&self, client_key: &str) -> Result<RateDecision> {
        self.check_and_increment(client_key, self.config.limit, self.config.window)
            .await
    }

    /// Count this request and admit it if the window still has room
    ///
    /// Fails with `RateLimitExceeded` once more than `limit` requests were
    /// counted in the current window. Key-value errors are returned as-is;
    /// the limiter never admits a request it could not count.
    pub async fn check_and_increment(
        &self,
        client_key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<RateDecision> {
        if client_key.trim().is_empty() {
            return Err(ReclaimError::BadRequest("Missing client key".into()));
        }

        let key = Self::key_for(client_key);
        let counted = self.kv.incr_window(&key, window).await?;

        if counted.count > limit {
            let retry_after_secs = counted.resets_in.as_secs_f64().ceil() as u64;
            warn!(
                client = %client_key,
                count = counted.count,
                limit,
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(ReclaimError::RateLimitExceeded {
                key: client_key.to_string(),
                limit,
                window_secs: window.as_secs(),
                retry_after_secs: retry_after_secs.max(1),
            });
        }

        debug!(client = %client_key, count = counted.count, limit, "Request admitted");

        Ok(RateDecision {
            count: counted.count,
            limit,
            remaining: limit - counted.count,
            resets_in: counted.resets_in,
        })
    }
}
