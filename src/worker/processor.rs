//! Worker processor - JetStream consumer for analysis requests
//!
//! Every worker binds to the same durable pull consumer, so running more
//! workers spreads messages across them. Messages are processed one at a
//! time and acked only after the record is stored.

use async_nats::jetstream::{self, consumer::PullConsumer, stream::Stream, AckKind};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::handler::{Disposition, SubmissionHandler};
use crate::nats::NatsClient;
use crate::types::{ReclaimError, Result};

/// Durable consumer shared by all workers
pub const CONSUMER_NAME: &str = "reclaim_analysis_workers";

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique worker ID, used in logs
    pub worker_id: String,
    pub stream: String,
    pub subject: String,
    pub consumer_name: String,
    /// Time JetStream waits for an ack before redelivering
    pub ack_wait: Duration,
    /// Deliveries before JetStream stops redelivering
    pub max_deliver: i64,
    /// Messages per pull
    pub fetch_batch: usize,
    /// How long one pull waits for messages
    pub fetch_expires: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: uuid::Uuid::new_v4().to_string(),
            stream: "ANALYSIS_REQUESTS".to_string(),
            subject: "analysis.request".to_string(),
            consumer_name: CONSUMER_NAME.to_string(),
            ack_wait: Duration::from_secs(60),
            max_deliver: 10,
            fetch_batch: 1,
            fetch_expires: Duration::from_secs(5),
        }
    }
}

/// Pull consumer definition shared by every worker
pub fn consumer_config(config: &WorkerConfig) -> jetstream::consumer::pull::Config {
    jetstream::consumer::pull::Config {
        durable_name: Some(config.consumer_name.clone()),
        ack_policy: jetstream::consumer::AckPolicy::Explicit,
        ack_wait: config.ack_wait,
        max_deliver: config.max_deliver,
        filter_subject: config.subject.clone(),
        ..Default::default()
    }
}

/// Queue reply for a handled message
fn ack_for(disposition: &Disposition) -> AckKind {
    match disposition {
        Disposition::Ack => AckKind::Ack,
        Disposition::Term => AckKind::Term,
        Disposition::Nak | Disposition::Halt(_) => AckKind::Nak(None),
    }
}

/// Progress through one fetched batch
///
/// Once the worker halts or is stopped, every remaining message in the batch
/// is handed back with a nak instead of being processed.
#[derive(Debug, Default)]
struct BatchOutcome {
    processed: usize,
    halted: Option<String>,
}

impl BatchOutcome {
    /// Whether the next message in the batch should be processed
    fn accepts(&self, running: bool) -> bool {
        running && self.halted.is_none()
    }

    /// Record a handled message and return the reply to send for it
    fn record(&mut self, disposition: &Disposition) -> AckKind {
        self.processed += 1;
        if let Disposition::Halt(reason) = disposition {
            self.halted = Some(reason.clone());
        }
        ack_for(disposition)
    }

    /// Messages processed, or the halt as a fatal error
    fn finish(self) -> Result<usize> {
        match self.halted {
            Some(reason) => Err(ReclaimError::Config(reason)),
            None => Ok(self.processed),
        }
    }
}

/// Queue consumer that runs `SubmissionHandler` per message
pub struct Worker {
    config: WorkerConfig,
    nats: NatsClient,
    handler: SubmissionHandler,
    running: Arc<RwLock<bool>>,
}

impl Worker {
    pub fn new(config: WorkerConfig, nats: NatsClient, handler: SubmissionHandler) -> Self {
        Self {
            config,
            nats,
            handler,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Run the processing loop until `stop` or a fatal error
    ///
    /// Returns `Err` only when the worker halted on a fatal error.
    pub async fn run(&self) -> Result<()> {
        *self.running.write().await = true;

        let stream = self
            .nats
            .ensure_stream(&self.config.stream, &self.config.subject)
            .await?;
        let consumer = self.ensure_consumer(&stream).await?;

        info!(
            "Worker {} starting analysis processing loop",
            self.config.worker_id
        );

        while *self.running.read().await {
            match self.process_batch(&consumer).await {
                Ok(outcome) => match outcome.finish() {
                    Ok(0) => {}
                    Ok(processed) => debug!("Processed {} requests", processed),
                    Err(e) => {
                        *self.running.write().await = false;
                        error!("Worker {} halted: {}", self.config.worker_id, e);
                        return Err(e);
                    }
                },
                Err(e) => {
                    error!("Error processing batch: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        info!("Worker {} stopped", self.config.worker_id);
        Ok(())
    }

    /// Stop pulling new messages; the message in flight still completes
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    async fn ensure_consumer(&self, stream: &Stream) -> Result<PullConsumer> {
        let consumer = stream
            .get_or_create_consumer(&self.config.consumer_name, consumer_config(&self.config))
            .await
            .map_err(|e| ReclaimError::Queue(format!("Failed to create consumer: {e}")))?;

        info!("Using consumer {}", self.config.consumer_name);
        Ok(consumer)
    }

    async fn process_batch(&self, consumer: &PullConsumer) -> Result<BatchOutcome> {
        let mut messages = consumer
            .fetch()
            .max_messages(self.config.fetch_batch)
            .expires(self.config.fetch_expires)
            .messages()
            .await
            .map_err(|e| ReclaimError::Queue(format!("Failed to fetch messages: {e}")))?;

        let mut outcome = BatchOutcome::default();

        while let Some(msg_result) = messages.next().await {
            let msg = match msg_result {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Error receiving message: {}", e);
                    continue;
                }
            };

            if !outcome.accepts(*self.running.read().await) {
                if let Err(e) = msg.ack_with(AckKind::Nak(None)).await {
                    warn!("Failed to nak abandoned message: {}", e);
                }
                continue;
            }

            let disposition = self.process_message(&msg).await;
            let reply = outcome.record(&disposition);
            if let Err(e) = msg.ack_with(reply).await {
                // The message will come back after ack_wait; the idempotency key
                // keeps the second pass from creating another record
                warn!(
                    disposition = disposition.label(),
                    "Failed to acknowledge message: {}",
                    e
                );
            }
        }

        Ok(outcome)
    }

    /// Run the handler on one message
    async fn process_message(&self, msg: &jetstream::Message) -> Disposition {
        let (published_at, delivery) = match msg.info() {
            Ok(info) => (
                DateTime::<Utc>::from_timestamp(
                    info.published.unix_timestamp(),
                    info.published.nanosecond(),
                )
                .unwrap_or_else(Utc::now),
                info.delivered,
            ),
            Err(e) => {
                warn!("Message carries no JetStream metadata: {}", e);
                (Utc::now(), 1)
            }
        };

        let disposition = self.handler.handle(&msg.payload, published_at, delivery).await;

        if matches!(disposition, Disposition::Nak | Disposition::Halt(_))
            && self.config.max_deliver > 0
            && delivery >= self.config.max_deliver
        {
            error!(
                delivery,
                max_deliver = self.config.max_deliver,
                "Final delivery failed, request will not be redelivered"
            );
        }

        disposition
    }
}
