//! OpenAI-compatible chat-completion classifier.
//!
//! Works with any OpenAI-compatible API (Groq, vLLM, Ollama, OpenAI).
//! The model is asked for a JSON object; the answer goes through
//! `verdict::parse_verdict` before it is trusted.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::traits::Classifier;
use super::verdict::parse_verdict;
use crate::models::Verdict;
use crate::types::{ReclaimError, Result};

/// Default endpoint (Groq's OpenAI-compatible API)
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Default model
pub const DEFAULT_MODEL: &str = "llama3-70b-8192";

const SYSTEM_PROMPT: &str =
    "You are an assistant that analyzes text for misogynistic content. You respond only in valid JSON.";

/// Configuration for the chat-completion classifier
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// API base URL, without the `/chat/completions` suffix
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Bearer token; absence is reported at classify time as `Config`
    pub api_key: Option<String>,
    /// Upper bound on one request, connect through body
    pub timeout: Duration,
    /// Sampling temperature
    pub temperature: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(20),
            temperature: 0.2,
        }
    }
}

/// Classifier backed by an OpenAI-compatible chat-completion endpoint
pub struct ChatCompletionClassifier {
    client: Client,
    config: ClassifierConfig,
}

impl ChatCompletionClassifier {
    /// Create a new classifier
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .user_agent("reclaim-worker/0.1")
            .build()
            .map_err(|e| ReclaimError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Build the request URL.
    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn user_prompt(text: &str) -> String {
        format!(
            "Analyze the following comment. Respond in JSON with keys: \
             sexism_score (number 0-1), explanation (string), \
             counter_comments (array of 2 short respectful replies), \
             tags (array, e.g. mansplaining, objectification, stereotype).\n\n\
             Comment: {}",
            serde_json::Value::String(text.to_string())
        )
    }
}

/// Chat completion request body.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormatRequest,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormatRequest {
    #[serde(rename = "type")]
    format_type: &'static str,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

#[async_trait]
impl Classifier for ChatCompletionClassifier {
    fn id(&self) -> &str {
        &self.config.model
    }

    async fn classify(&self, text: &str) -> Result<Verdict> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ReclaimError::Config("GROQ_API_KEY is not set".into()))?;

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: Self::user_prompt(text),
                },
            ],
            temperature: self.config.temperature,
            response_format: ResponseFormatRequest {
                format_type: "json_object",
            },
        };

        let response = self
            .client
            .post(self.chat_completions_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReclaimError::Transport(format!(
                        "Classifier timed out after {:?}",
                        self.config.timeout
                    ))
                } else {
                    ReclaimError::Transport(format!("Classifier request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(200).collect();

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(ReclaimError::Config(format!(
                    "Classifier rejected credentials (HTTP {})",
                    status
                )));
            }

            return Err(ReclaimError::Transport(format!(
                "Classifier returned HTTP {}: {}",
                status, body
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ReclaimError::Format(format!("Invalid API response format: {}", e)))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ReclaimError::Format("No content in classifier response".into()))?;

        debug!(model = %self.config.model, bytes = content.len(), "Classifier answered");

        parse_verdict(&content)
    }
}
