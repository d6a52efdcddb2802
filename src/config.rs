//! Configuration for Reclaim
//!
//! CLI arguments and environment variable handling using clap. Both binaries
//! flatten the same connection groups; `.env` files are loaded by the
//! binaries before parsing.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::time::Duration;

use crate::classifier::ClassifierConfig;
use crate::ledger::LedgerConfig;
use crate::limiter::RateLimitConfig;
use crate::logging::LogFormat;
use crate::models::{RecordFilter, VoteChoice};
use crate::types::{ReclaimError, Result};
use crate::worker::{HandlerConfig, WorkerConfig};

/// NATS connection and stream configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD", hide_env_values = true)]
    pub nats_password: Option<String>,

    /// JetStream stream holding analysis requests
    #[arg(long, env = "NATS_STREAM", default_value = "ANALYSIS_REQUESTS")]
    pub nats_stream: String,

    /// Subject analysis requests are published on
    #[arg(long, env = "NATS_SUBJECT", default_value = "analysis.request")]
    pub nats_subject: String,
}

impl NatsArgs {
    pub fn validate(&self) -> Result<()> {
        if self.nats_stream.trim().is_empty() {
            return Err(ReclaimError::Config("NATS_STREAM must not be empty".into()));
        }
        if self.nats_subject.trim().is_empty() || self.nats_subject.contains(char::is_whitespace) {
            return Err(ReclaimError::Config(format!(
                "NATS_SUBJECT '{}' is not a valid subject",
                self.nats_subject
            )));
        }
        if self.nats_user.is_some() != self.nats_password.is_some() {
            return Err(ReclaimError::Config(
                "NATS_USER and NATS_PASSWORD must be set together".into(),
            ));
        }
        Ok(())
    }
}

/// MongoDB connection configuration
#[derive(Parser, Debug, Clone)]
pub struct MongoArgs {
    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "reclaim")]
    pub mongodb_db: String,

    /// Upper bound for one storage operation in milliseconds
    #[arg(long, env = "STORAGE_TIMEOUT_MS", default_value = "10000")]
    pub storage_timeout_ms: u64,
}

impl MongoArgs {
    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.mongodb_uri.starts_with("mongodb://") && !self.mongodb_uri.starts_with("mongodb+srv://") {
            return Err(ReclaimError::Config(
                "MONGODB_URI must start with mongodb:// or mongodb+srv://".into(),
            ));
        }
        if self.mongodb_db.trim().is_empty() {
            return Err(ReclaimError::Config("MONGODB_DB must not be empty".into()));
        }
        if self.storage_timeout_ms == 0 {
            return Err(ReclaimError::Config("STORAGE_TIMEOUT_MS must be positive".into()));
        }
        Ok(())
    }
}

/// Redis configuration
#[derive(Parser, Debug, Clone)]
pub struct RedisArgs {
    /// Redis URL for rate limit counters and the read cache
    /// (in-process fallback when unset)
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,
}

/// Classification service configuration
#[derive(Parser, Debug, Clone)]
pub struct ClassifierArgs {
    /// OpenAI-compatible API base URL
    #[arg(long, env = "CLASSIFIER_URL", default_value = crate::classifier::openai::DEFAULT_BASE_URL)]
    pub classifier_url: String,

    /// API key for the classification service
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub groq_api_key: Option<String>,

    /// Model name
    #[arg(long, env = "CLASSIFIER_MODEL", default_value = crate::classifier::openai::DEFAULT_MODEL)]
    pub classifier_model: String,

    /// Request timeout in milliseconds
    #[arg(long, env = "CLASSIFIER_TIMEOUT_MS", default_value = "20000")]
    pub classifier_timeout_ms: u64,
}

impl ClassifierArgs {
    pub fn to_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            base_url: self.classifier_url.clone(),
            model: self.classifier_model.clone(),
            api_key: self.groq_api_key.clone().filter(|k| !k.trim().is_empty()),
            timeout: Duration::from_millis(self.classifier_timeout_ms),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.classifier_url.starts_with("http://") && !self.classifier_url.starts_with("https://") {
            return Err(ReclaimError::Config(format!(
                "CLASSIFIER_URL '{}' must be an http(s) URL",
                self.classifier_url
            )));
        }
        if self.classifier_timeout_ms == 0 {
            return Err(ReclaimError::Config("CLASSIFIER_TIMEOUT_MS must be positive".into()));
        }
        Ok(())
    }
}

/// Rate limiting and read cache configuration
#[derive(Parser, Debug, Clone)]
pub struct LimitArgs {
    /// Requests allowed per client per window
    #[arg(long, env = "RATE_LIMIT_REQUESTS", default_value = "10")]
    pub rate_limit_requests: u64,

    /// Rate limit window in seconds
    #[arg(long, env = "RATE_LIMIT_WINDOW_SECS", default_value = "60")]
    pub rate_limit_window_secs: u64,

    /// Read cache entry lifetime in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "300")]
    pub cache_ttl_secs: u64,

    /// Maximum records per listing
    #[arg(long, env = "QUERY_LIMIT", default_value = "100")]
    pub query_limit: usize,
}

impl LimitArgs {
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            limit: self.rate_limit_requests,
            window: Duration::from_secs(self.rate_limit_window_secs),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_limit_requests == 0 {
            return Err(ReclaimError::Config("RATE_LIMIT_REQUESTS must be positive".into()));
        }
        if self.rate_limit_window_secs == 0 {
            return Err(ReclaimError::Config("RATE_LIMIT_WINDOW_SECS must be positive".into()));
        }
        if self.cache_ttl_secs == 0 {
            return Err(ReclaimError::Config("CACHE_TTL_SECS must be positive".into()));
        }
        if self.query_limit == 0 {
            return Err(ReclaimError::Config("QUERY_LIMIT must be positive".into()));
        }
        Ok(())
    }
}

/// Vote ledger retry configuration
#[derive(Parser, Debug, Clone)]
pub struct LedgerArgs {
    /// Attempts per vote mutation before giving up
    #[arg(long, env = "LEDGER_MAX_ATTEMPTS", default_value = "5")]
    pub ledger_max_attempts: u32,

    /// Backoff before the second attempt in milliseconds, doubled per conflict
    #[arg(long, env = "LEDGER_BACKOFF_MS", default_value = "25")]
    pub ledger_backoff_ms: u64,
}

impl LedgerArgs {
    pub fn ledger_config(&self, attempt_timeout: Duration) -> LedgerConfig {
        LedgerConfig {
            max_attempts: self.ledger_max_attempts,
            base_backoff: Duration::from_millis(self.ledger_backoff_ms),
            attempt_timeout,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledger_max_attempts == 0 {
            return Err(ReclaimError::Config("LEDGER_MAX_ATTEMPTS must be positive".into()));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Parser, Debug, Clone)]
pub struct LogArgs {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

// ============================================================================
// Worker
// ============================================================================

/// Reclaim worker - consumes analysis requests from JetStream
#[derive(Parser, Debug, Clone)]
#[command(name = "reclaim-worker")]
#[command(about = "Queue consumer that classifies submissions and stores analysis records")]
#[command(version)]
pub struct WorkerArgs {
    /// Unique worker ID (auto-generated if not provided)
    #[arg(long, env = "WORKER_ID")]
    pub worker_id: Option<String>,

    /// Seconds JetStream waits for an ack before redelivering
    #[arg(long, env = "ACK_WAIT_SECS", default_value = "60")]
    pub ack_wait_secs: u64,

    /// Deliveries per message before JetStream gives up on it
    #[arg(long, env = "MAX_DELIVER", default_value = "10")]
    pub max_deliver: i64,

    /// Messages fetched per pull
    #[arg(long, env = "FETCH_BATCH", default_value = "1")]
    pub fetch_batch: usize,

    /// Width in seconds of the submission time bucket in idempotency keys
    #[arg(long, env = "IDEMPOTENCY_BUCKET_SECS", default_value = "3600")]
    pub idempotency_bucket_secs: u64,

    #[command(flatten)]
    pub nats: NatsArgs,

    #[command(flatten)]
    pub mongo: MongoArgs,

    #[command(flatten)]
    pub classifier: ClassifierArgs,

    #[command(flatten)]
    pub log: LogArgs,
}

impl WorkerArgs {
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            worker_id: self
                .worker_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            stream: self.nats.nats_stream.clone(),
            subject: self.nats.nats_subject.clone(),
            ack_wait: Duration::from_secs(self.ack_wait_secs),
            max_deliver: self.max_deliver,
            fetch_batch: self.fetch_batch,
            ..Default::default()
        }
    }

    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            storage_timeout: self.mongo.storage_timeout(),
            idempotency_bucket_secs: self.idempotency_bucket_secs,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.nats.validate()?;
        self.mongo.validate()?;
        self.classifier.validate()?;

        if self.ack_wait_secs == 0 {
            return Err(ReclaimError::Config("ACK_WAIT_SECS must be positive".into()));
        }
        if self.max_deliver == 0 || self.max_deliver < -1 {
            return Err(ReclaimError::Config(
                "MAX_DELIVER must be positive, or -1 for unlimited".into(),
            ));
        }
        if self.fetch_batch == 0 {
            return Err(ReclaimError::Config("FETCH_BATCH must be positive".into()));
        }
        if self.idempotency_bucket_secs == 0 {
            return Err(ReclaimError::Config("IDEMPOTENCY_BUCKET_SECS must be positive".into()));
        }
        // The classifier and the write both run inside one ack window
        let budget_ms = self.classifier.classifier_timeout_ms + self.mongo.storage_timeout_ms;
        if budget_ms >= self.ack_wait_secs * 1000 {
            return Err(ReclaimError::Config(format!(
                "ACK_WAIT_SECS ({}s) must exceed CLASSIFIER_TIMEOUT_MS + STORAGE_TIMEOUT_MS ({}ms)",
                self.ack_wait_secs, budget_ms
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Operator CLI
// ============================================================================

/// Reclaim - submit comments, vote on analyses and read the log
#[derive(Parser, Debug, Clone)]
#[command(name = "reclaim")]
#[command(about = "Operator CLI for the Reclaim analysis pipeline and vote ledger")]
#[command(version)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Width in seconds of the submission time bucket in idempotency keys
    #[arg(long, env = "IDEMPOTENCY_BUCKET_SECS", default_value = "3600")]
    pub idempotency_bucket_secs: u64,

    #[command(flatten)]
    pub nats: NatsArgs,

    #[command(flatten)]
    pub mongo: MongoArgs,

    #[command(flatten)]
    pub redis: RedisArgs,

    #[command(flatten)]
    pub limits: LimitArgs,

    #[command(flatten)]
    pub ledger: LedgerArgs,

    #[command(flatten)]
    pub log: LogArgs,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Queue a comment for analysis
    Submit {
        /// Comment text
        text: String,

        /// Submitting user
        #[arg(long)]
        submitter: String,
    },

    /// Cast or change a vote on an analysis record
    Vote {
        /// Record id
        record_id: String,

        /// Voting user
        #[arg(long)]
        voter: String,

        /// affirmative | negative (also sexist | notSexist)
        #[arg(long)]
        vote: VoteChoice,
    },

    /// Retract a vote
    Retract {
        /// Record id
        record_id: String,

        /// Voting user
        #[arg(long)]
        voter: String,
    },

    /// List analysis records, newest first
    Logs {
        #[arg(long)]
        tag: Option<String>,

        #[arg(long)]
        min_severity: Option<f64>,

        #[arg(long)]
        submitter: Option<String>,

        /// RFC 3339 lower bound on creation time
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// RFC 3339 upper bound on creation time (exclusive)
        #[arg(long)]
        until: Option<DateTime<Utc>>,

        #[arg(long)]
        limit: Option<usize>,

        /// Client identity charged against the rate limit
        #[arg(long, default_value = "cli")]
        client: String,
    },

    /// Show one analysis record
    Show {
        /// Record id
        id: String,

        /// Client identity charged against the rate limit
        #[arg(long, default_value = "cli")]
        client: String,
    },
}

impl Command {
    /// Filter for the `logs` subcommand
    pub fn record_filter(&self) -> Option<RecordFilter> {
        match self {
            Self::Logs {
                tag,
                min_severity,
                submitter,
                since,
                until,
                limit,
                ..
            } => Some(RecordFilter {
                tag: tag.clone(),
                min_severity: *min_severity,
                submitter_id: submitter.clone(),
                since: *since,
                until: *until,
                limit: *limit,
            }),
            _ => None,
        }
    }
}

impl CliArgs {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.nats.validate()?;
        self.mongo.validate()?;
        self.limits.validate()?;
        self.ledger.validate()?;
        if self.idempotency_bucket_secs == 0 {
            return Err(ReclaimError::Config("IDEMPOTENCY_BUCKET_SECS must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_defaults() {
        let args = WorkerArgs::try_parse_from(["reclaim-worker"]).unwrap();
        assert_eq!(args.nats.nats_stream, "ANALYSIS_REQUESTS");
        assert_eq!(args.nats.nats_subject, "analysis.request");
        assert_eq!(args.mongo.mongodb_db, "reclaim");
        assert_eq!(args.classifier.classifier_timeout_ms, 20000);
        assert_eq!(args.log.log_format, LogFormat::Pretty);
        assert!(args.validate().is_ok());

        let config = args.worker_config();
        assert_eq!(config.ack_wait, Duration::from_secs(60));
        assert_eq!(config.max_deliver, 10);
        assert!(!config.worker_id.is_empty());
    }

    #[test]
    fn test_worker_rejects_ack_wait_shorter_than_work() {
        let args = WorkerArgs::try_parse_from([
            "reclaim-worker",
            "--ack-wait-secs",
            "20",
            "--classifier-timeout-ms",
            "20000",
        ])
        .unwrap();
        assert!(matches!(args.validate(), Err(ReclaimError::Config(_))));
    }

    #[test]
    fn test_cli_vote_accepts_legacy_value() {
        let args = CliArgs::try_parse_from([
            "reclaim",
            "vote",
            "65f0c0ffee",
            "--voter",
            "u1",
            "--vote",
            "notSexist",
        ])
        .unwrap();

        match &args.command {
            Command::Vote { vote, voter, .. } => {
                assert_eq!(*vote, VoteChoice::Negative);
                assert_eq!(voter, "u1");
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_cli_logs_filter() {
        let args = CliArgs::try_parse_from([
            "reclaim",
            "logs",
            "--tag",
            "stereotype",
            "--since",
            "2026-01-01T00:00:00Z",
            "--limit",
            "5",
        ])
        .unwrap();

        let filter = args.command.record_filter().unwrap();
        assert_eq!(filter.tag.as_deref(), Some("stereotype"));
        assert_eq!(filter.limit, Some(5));
        assert!(filter.since.is_some());
        assert_eq!(args.limits.rate_limit_requests, 10);
    }

    #[test]
    fn test_zero_limits_rejected() {
        let args = CliArgs::try_parse_from([
            "reclaim",
            "--rate-limit-requests",
            "0",
            "show",
            "abc",
        ])
        .unwrap();
        assert!(matches!(args.validate(), Err(ReclaimError::Config(_))));
    }
}
