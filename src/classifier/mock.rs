//! Scripted classifier for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use super::traits::Classifier;
use crate::models::Verdict;
use crate::types::{ReclaimError, Result};

/// One scripted answer
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Verdict(Verdict),
    Transport(String),
    Format(String),
    Config(String),
}

impl ScriptedOutcome {
    fn into_result(self) -> Result<Verdict> {
        match self {
            Self::Verdict(v) => Ok(v),
            Self::Transport(m) => Err(ReclaimError::Transport(m)),
            Self::Format(m) => Err(ReclaimError::Format(m)),
            Self::Config(m) => Err(ReclaimError::Config(m)),
        }
    }
}

/// Classifier that replays queued outcomes, then a fallback.
pub struct ScriptedClassifier {
    queued: Mutex<VecDeque<ScriptedOutcome>>,
    fallback: ScriptedOutcome,
    call_count: AtomicU32,
}

impl ScriptedClassifier {
    /// Always answer with `verdict`
    pub fn always(verdict: Verdict) -> Self {
        Self::with_fallback(ScriptedOutcome::Verdict(verdict))
    }

    /// Answer with `fallback` once the queue is drained
    pub fn with_fallback(fallback: ScriptedOutcome) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback,
            call_count: AtomicU32::new(0),
        }
    }

    /// Queue an outcome ahead of the fallback
    pub fn then(self, outcome: ScriptedOutcome) -> Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.push_back(outcome);
        }
        self
    }

    /// Number of times classify was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn classify(&self, _text: &str) -> Result<Verdict> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        let next = self
            .queued
            .lock()
            .ok()
            .and_then(|mut queued| queued.pop_front())
            .unwrap_or_else(|| self.fallback.clone());

        next.into_result()
    }
}
