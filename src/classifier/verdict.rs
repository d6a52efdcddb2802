//! Strict parsing of classifier answers
//!
//! The upstream model is asked for a JSON object but sometimes wraps it in
//! prose, code fences, or a second layer of string escaping. Parsing is tried
//! once on the raw answer and once after a single normalization pass. Anything
//! still unparseable, or parseable but out of schema, is a `Format` error.

use serde::Deserialize;
use std::collections::BTreeSet;

use crate::models::Verdict;
use crate::types::{ReclaimError, Result};

/// Wire shape of the model answer, accepting the legacy key names
#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(alias = "sexism_score", alias = "severityScore")]
    severity_score: f64,
    explanation: String,
    #[serde(alias = "counter_comments", alias = "counterResponses")]
    counter_responses: Vec<String>,
    tags: Vec<String>,
}

/// Parse and validate a model answer
pub fn parse_verdict(content: &str) -> Result<Verdict> {
    let raw = match serde_json::from_str::<RawVerdict>(content.trim()) {
        Ok(raw) => raw,
        Err(first) => {
            let normalized = normalize(content);
            serde_json::from_str::<RawVerdict>(&normalized).map_err(|second| {
                ReclaimError::Format(format!(
                    "Classifier answer is not a valid verdict ({}; after normalization: {})",
                    first, second
                ))
            })?
        }
    };

    validate(raw)
}

/// One normalization pass: undo one level of string escaping, then keep the
/// outermost `{...}` span.
fn normalize(content: &str) -> String {
    let trimmed = content.trim();

    let unescaped = if trimmed.starts_with('"') {
        serde_json::from_str::<String>(trimmed).ok()
    } else if trimmed.contains("\\\"") {
        serde_json::from_str::<String>(&format!("\"{}\"", trimmed)).ok()
    } else {
        None
    };
    let text = unescaped.unwrap_or_else(|| trimmed.to_string());

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => text[start..=end].to_string(),
        _ => text,
    }
}

fn validate(raw: RawVerdict) -> Result<Verdict> {
    if !raw.severity_score.is_finite() || !(0.0..=1.0).contains(&raw.severity_score) {
        return Err(ReclaimError::Format(format!(
            "severity score {} outside [0, 1]",
            raw.severity_score
        )));
    }

    let explanation = raw.explanation.trim().to_string();
    if explanation.is_empty() {
        return Err(ReclaimError::Format("empty explanation".into()));
    }

    let counter_responses = raw
        .counter_responses
        .into_iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();

    let tags: BTreeSet<String> = raw
        .tags
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    Ok(Verdict {
        severity_score: raw.severity_score,
        explanation,
        counter_responses,
        tags,
    })
}
