//! NATS messaging for the analysis queue
//!
//! - `NatsClient`: connection and stream setup
//! - `SubmissionPublisher`: producer side, waits for the JetStream ack
//!
//! The consumer side lives in `worker`.

pub mod client;
pub mod publisher;

pub use client::{stream_config, NatsClient};
pub use publisher::{PublishReceipt, SubmissionPublisher};
