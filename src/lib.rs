//! Reclaim - analysis pipeline and community vote ledger
//!
//! Reported comments are queued on NATS JetStream, classified by an
//! OpenAI-compatible model and stored in MongoDB. Readers vote on each
//! analysis; the ledger keeps every record's tally equal to its vote entries.
//!
//! ## Components
//!
//! - **Worker**: JetStream consumer, classify then persist, ack after write
//! - **Classifier**: chat-completion client with strict verdict parsing
//! - **Store**: record store and atomic ledger mutation (MongoDB or memory)
//! - **Ledger**: cast/retract with conflict retry
//! - **Limiter / Cache**: fixed-window rate limiting and short-TTL read cache
//!   on Redis or memory
//! - **Queries**: rate-limited, cached record listings

pub mod cache;
pub mod classifier;
pub mod config;
pub mod db;
pub mod kv;
pub mod ledger;
pub mod limiter;
pub mod logging;
pub mod models;
pub mod nats;
pub mod queries;
pub mod store;
pub mod types;
pub mod worker;

pub use ledger::{LedgerConfig, VoteLedger, VoteReceipt};
pub use types::{ReclaimError, Result};
