//! NATS JetStream client wrapper
//!
//! Connection setup with credentials and fast initial failure, plus the
//! durable stream that carries analysis requests.

use async_nats::jetstream::{self, stream::Stream};
use async_nats::ConnectOptions;
use std::time::Duration;
use tracing::info;

use crate::config::NatsArgs;
use crate::types::{ReclaimError, Result};

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// Requests older than this are dropped by the stream
const STREAM_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 3600);

/// Window in which JetStream drops re-published messages with the same id
const DUPLICATE_WINDOW: Duration = Duration::from_secs(120);

/// NATS client wrapper with JetStream support
#[derive(Clone)]
pub struct NatsClient {
    jetstream: jetstream::Context,
}

impl NatsClient {
    /// Connect to NATS
    pub async fn new(args: &NatsArgs, name: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", args.nats_url);

        // No retry_on_initial_connect: fail fast if NATS is not there.
        // Reconnection still works after the first successful connect.
        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| ReclaimError::Queue(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);

        let jetstream = jetstream::new(client);

        Ok(Self { jetstream })
    }

    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    /// Get or create the file-backed stream for `subject`
    pub async fn ensure_stream(&self, stream: &str, subject: &str) -> Result<Stream> {
        let handle = self
            .jetstream
            .get_or_create_stream(stream_config(stream, subject))
            .await
            .map_err(|e| ReclaimError::Queue(format!("Failed to create stream {}: {}", stream, e)))?;

        info!("Using stream {} with subject {}", stream, subject);
        Ok(handle)
    }
}

/// Stream definition for analysis requests
///
/// Work-queue retention removes a message once it is acked, file storage
/// keeps pending requests across a server restart.
pub fn stream_config(stream: &str, subject: &str) -> jetstream::stream::Config {
    jetstream::stream::Config {
        name: stream.to_string(),
        subjects: vec![subject.to_string()],
        retention: jetstream::stream::RetentionPolicy::WorkQueue,
        storage: jetstream::stream::StorageType::File,
        max_age: STREAM_MAX_AGE,
        duplicate_window: DUPLICATE_WINDOW,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Connection tests need a running NATS server

    #[test]
    fn test_stream_is_durable_work_queue() {
        let config = stream_config("ANALYSIS_REQUESTS", "analysis.request");
        assert_eq!(config.name, "ANALYSIS_REQUESTS");
        assert_eq!(config.subjects, vec!["analysis.request".to_string()]);
        assert_eq!(config.storage, jetstream::stream::StorageType::File);
        assert_eq!(config.retention, jetstream::stream::RetentionPolicy::WorkQueue);
    }
}
