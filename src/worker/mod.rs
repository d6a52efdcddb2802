//! Analysis worker
//!
//! - `SubmissionHandler`: classify one submission and store the record
//! - `Worker`: JetStream pull loop that applies the handler's `Disposition`

pub mod handler;
pub mod processor;

pub use handler::{Disposition, HandlerConfig, SubmissionHandler};
pub use processor::{consumer_config, Worker, WorkerConfig, CONSUMER_NAME};
