//! Database schemas for Reclaim
//!
//! Defines MongoDB document structures for analysis records and vote entries.

mod analysis;
mod metadata;
mod vote;

pub use analysis::{AiAnalysis, AnalysisDoc, VoteCounts, ANALYSIS_COLLECTION};
pub use metadata::Metadata;
pub use vote::{VoteDoc, VOTE_COLLECTION};
