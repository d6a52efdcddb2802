//! Publishes analysis requests onto the JetStream subject

use async_nats::header::NATS_MESSAGE_ID;
use async_nats::jetstream;
use async_nats::HeaderMap;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::models::Submission;
use crate::types::{ReclaimError, Result};

/// Acknowledged publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub stream: String,
    pub sequence: u64,
    /// JetStream had already stored a message with this id
    pub duplicate: bool,
    pub idempotency_key: String,
}

/// A submission ready to go on the wire
#[derive(Debug, Clone)]
pub struct OutgoingSubmission {
    pub submission: Submission,
    pub payload: Bytes,
    pub message_id: String,
}

/// Validate, stamp and encode a submission
///
/// The message id is the submission's idempotency key, so a publisher retry
/// inside JetStream's duplicate window is dropped by the server.
pub fn prepare(
    mut submission: Submission,
    now: DateTime<Utc>,
    bucket_secs: u64,
) -> Result<OutgoingSubmission> {
    submission.validate()?;

    let submitted_at = *submission.submitted_at.get_or_insert(now);
    let message_id = submission.idempotency_key(submitted_at, bucket_secs);
    let payload = Bytes::from(serde_json::to_vec(&submission)?);

    Ok(OutgoingSubmission {
        submission,
        payload,
        message_id,
    })
}

/// Producer side of the analysis queue
#[derive(Clone)]
pub struct SubmissionPublisher {
    jetstream: jetstream::Context,
    subject: String,
    bucket_secs: u64,
}

impl SubmissionPublisher {
    pub fn new(jetstream: jetstream::Context, subject: impl Into<String>, bucket_secs: u64) -> Self {
        Self {
            jetstream,
            subject: subject.into(),
            bucket_secs,
        }
    }

    /// Publish and wait for the stream to persist the message
    pub async fn publish(&self, submission: Submission) -> Result<PublishReceipt> {
        let outgoing = prepare(submission, Utc::now(), self.bucket_secs)?;

        let mut headers = HeaderMap::new();
        headers.insert(NATS_MESSAGE_ID, outgoing.message_id.as_str());

        debug!(
            submitter_id = %outgoing.submission.submitter_id,
            subject = %self.subject,
            "Publishing analysis request"
        );

        let ack = self
            .jetstream
            .publish_with_headers(self.subject.clone(), headers, outgoing.payload)
            .await
            .map_err(|e| ReclaimError::Queue(format!("Publish failed: {}", e)))?
            .await
            .map_err(|e| ReclaimError::Queue(format!("Publish not acknowledged: {}", e)))?;

        info!(
            submitter_id = %outgoing.submission.submitter_id,
            stream = %ack.stream,
            sequence = ack.sequence,
            duplicate = ack.duplicate,
            "Analysis request queued"
        );

        Ok(PublishReceipt {
            stream: ack.stream,
            sequence: ack.sequence,
            duplicate: ack.duplicate,
            idempotency_key: outgoing.message_id,
        })
    }
}
