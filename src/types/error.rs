//! Error types for Reclaim
//!
//! One taxonomy shared by the classifier, the record store, the vote ledger
//! and the rate limiter. Callers decide between redelivery, refusal and halt
//! by looking at the variant.

/// Main error type for Reclaim operations
#[derive(Debug, thiserror::Error)]
pub enum ReclaimError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Rate limit exceeded for {key}: more than {limit} requests in {window_secs}s")]
    RateLimitExceeded {
        key: String,
        limit: u64,
        window_secs: u64,
        retry_after_secs: u64,
    },

    /// Logged when a vote would drive a tally negative; vote calls still succeed
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Cache error: {0}")]
    Cache(String),
}

impl ReclaimError {
    /// Whether redelivery or a later retry could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Format(_) | Self::Storage(_) | Self::Queue(_) | Self::Cache(_)
        )
    }

    /// Whether the error should stop a consumer instead of looping on redelivery
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Short stable label for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Format(_) => "format",
            Self::Config(_) => "config",
            Self::Storage(_) => "storage",
            Self::RateLimitExceeded { .. } => "rate_limited",
            Self::InvariantViolation(_) => "invariant",
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Queue(_) => "queue",
            Self::Cache(_) => "cache",
        }
    }
}

// From conversions for the stack's error types

impl From<serde_json::Error> for ReclaimError {
    fn from(err: serde_json::Error) -> Self {
        Self::Format(format!("JSON error: {}", err))
    }
}

impl From<mongodb::error::Error> for ReclaimError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<bson::oid::Error> for ReclaimError {
    fn from(err: bson::oid::Error) -> Self {
        Self::BadRequest(format!("Invalid record id: {}", err))
    }
}

impl From<redis::RedisError> for ReclaimError {
    fn from(err: redis::RedisError) -> Self {
        Self::Cache(err.to_string())
    }
}

impl From<async_nats::Error> for ReclaimError {
    fn from(err: async_nats::Error) -> Self {
        Self::Queue(err.to_string())
    }
}

impl From<reqwest::Error> for ReclaimError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result type alias for Reclaim operations
pub type Result<T> = std::result::Result<T, ReclaimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_is_fatal_not_retryable() {
        let err = ReclaimError::Config("missing GROQ_API_KEY".into());
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_classification_failures_are_retryable() {
        assert!(ReclaimError::Transport("timeout".into()).is_retryable());
        assert!(ReclaimError::Format("not json".into()).is_retryable());
        assert!(ReclaimError::Storage("conflict".into()).is_retryable());
    }

    #[test]
    fn test_rate_limit_message() {
        let err = ReclaimError::RateLimitExceeded {
            key: "rate_limit:10.0.0.1".into(),
            limit: 10,
            window_secs: 60,
            retry_after_secs: 42,
        };
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded for rate_limit:10.0.0.1: more than 10 requests in 60s"
        );
    }
}
