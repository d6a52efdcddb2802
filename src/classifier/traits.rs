//! Core trait for classification backends.

use async_trait::async_trait;

use crate::models::Verdict;
use crate::types::Result;

/// Synchronous call to an external text-classification service.
///
/// Implementations apply their own bounded timeout and never retry;
/// redelivery is the queue consumer's job. Failures are reported as
/// `ReclaimError::Transport`, `ReclaimError::Format` or `ReclaimError::Config`.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Backend identifier (e.g. model name)
    fn id(&self) -> &str;

    /// Classify one piece of text
    async fn classify(&self, text: &str) -> Result<Verdict>;
}
