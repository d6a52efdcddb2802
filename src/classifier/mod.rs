//! Classification client
//!
//! - `Classifier` trait: one text in, one `Verdict` out, typed failures
//! - `ChatCompletionClassifier`: OpenAI-compatible HTTP backend
//! - `ScriptedClassifier`: replayed outcomes for tests

pub mod mock;
pub mod openai;
pub mod traits;
pub mod verdict;

pub use mock::{ScriptedClassifier, ScriptedOutcome};
pub use openai::{ChatCompletionClassifier, ClassifierConfig};
pub use traits::Classifier;
pub use verdict::parse_verdict;
