//! Reasoning-service client for the pre-screen conversation.
//!
//! Provides a `ReasoningBackend` trait with one implementation:
//! - **OpenAI chat completions** via `reqwest`, optionally streamed as
//!   server-sent events.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::ReasoningSettings;
use crate::models::ChatMessage;

// ============================================================================
// ReasoningBackend trait
// ============================================================================

/// Abstraction over the conversational reasoning service.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Send the full role-tagged history and return the complete reply text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ReasoningError>;

    /// Like `complete`, but forwards reply fragments as they arrive. The
    /// returned text is always the full reply. Defaults to a single fragment.
    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        fragments: mpsc::UnboundedSender<String>,
    ) -> Result<String, ReasoningError> {
        let reply = self.complete(messages).await?;
        let _ = fragments.send(reply.clone());
        Ok(reply)
    }

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum ReasoningError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Reasoning service returned an empty reply")]
    EmptyReply,

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },

    #[error("Stream error: {0}")]
    Stream(String),
}

impl ReasoningError {
    /// Network failures, rate limits and server errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// Config types
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl ReasoningConfig {
    /// Build from the `[reasoning]` section. Falls back to `OPENAI_API_KEY`
    /// when no key is passed in.
    pub fn from_settings(settings: &ReasoningSettings, api_key: Option<String>) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            timeout_seconds: settings.timeout_seconds,
            max_retries: settings.max_retries,
            retry_delay_ms: settings.retry_delay_ms,
        }
    }
}

/// Create the reasoning backend from configuration.
pub fn create_backend(config: ReasoningConfig) -> Result<Box<dyn ReasoningBackend>, ReasoningError> {
    Ok(Box::new(OpenAiChatClient::new(config)?))
}

// ============================================================================
// Chat completions API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// OpenAiChatClient
// ============================================================================

/// Chat-completions client. History goes out in full on every call.
#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    client: Client,
    config: ReasoningConfig,
}

impl OpenAiChatClient {
    pub fn new(config: ReasoningConfig) -> Result<Self, ReasoningError> {
        if config.api_key.is_empty() {
            return Err(ReasoningError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { client, config })
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(mut config: ReasoningConfig, base_url: String) -> Result<Self, ReasoningError> {
        config.base_url = base_url.trim_end_matches('/').to_string();
        Self::new(config)
    }

    fn retry_strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries)
    }

    fn finish_retry(&self, e: ReasoningError) -> ReasoningError {
        if e.is_transient() {
            tracing::error!(
                attempts = self.config.max_retries,
                error = %e,
                "All reasoning retry attempts failed"
            );
            ReasoningError::RetryExhausted {
                attempts: self.config.max_retries,
            }
        } else {
            e
        }
    }

    /// POST the request and return the response once it has a 2xx status.
    async fn send_once(
        &self,
        messages: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response, ReasoningError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let request = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages,
            stream,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::warn!(code = status.as_u16(), message = %message, "Reasoning API error");

            return Err(ReasoningError::Api {
                code: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    async fn complete_once(&self, messages: &[ChatMessage]) -> Result<String, ReasoningError> {
        let response = self.send_once(messages, false).await?;
        let body: ChatResponse = response.json().await?;

        let reply = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();

        if reply.trim().is_empty() {
            return Err(ReasoningError::EmptyReply);
        }
        Ok(reply)
    }
}

#[async_trait]
impl ReasoningBackend for OpenAiChatClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ReasoningError> {
        let reply = RetryIf::spawn(
            self.retry_strategy(),
            || self.complete_once(messages),
            |e: &ReasoningError| e.is_transient(),
        )
        .await
        .map_err(|e| self.finish_retry(e))?;

        tracing::debug!(
            backend = self.name(),
            messages = messages.len(),
            reply_len = reply.len(),
            "Reasoning reply received"
        );
        Ok(reply)
    }

    /// Only connecting is retried; once fragments have been forwarded a
    /// failure ends the turn.
    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        fragments: mpsc::UnboundedSender<String>,
    ) -> Result<String, ReasoningError> {
        let response = RetryIf::spawn(
            self.retry_strategy(),
            || self.send_once(messages, true),
            |e: &ReasoningError| e.is_transient(),
        )
        .await
        .map_err(|e| self.finish_retry(e))?;

        let mut body = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();
        let mut reply = String::new();
        let mut done = false;

        'outer: while let Some(chunk) = body.next().await {
            pending.extend_from_slice(&chunk?);

            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                match parse_sse_line(&line)? {
                    SseLine::Done => {
                        done = true;
                        break 'outer;
                    }
                    SseLine::Fragment(text) => {
                        reply.push_str(&text);
                        let _ = fragments.send(text);
                    }
                    SseLine::Skip => {}
                }
            }
        }

        // A body that ends without a newline still carries its last line.
        if !done && !pending.is_empty() {
            let line = String::from_utf8_lossy(&pending);
            if let SseLine::Fragment(text) = parse_sse_line(&line)? {
                reply.push_str(&text);
                let _ = fragments.send(text);
            }
        }

        if reply.trim().is_empty() {
            return Err(ReasoningError::EmptyReply);
        }

        tracing::debug!(
            backend = self.name(),
            messages = messages.len(),
            reply_len = reply.len(),
            "Streamed reasoning reply received"
        );
        Ok(reply)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Fragment(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, ReasoningError> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }

    let chunk: ChatChunk =
        serde_json::from_str(data).map_err(|e| ReasoningError::Stream(e.to_string()))?;
    let text = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .unwrap_or_default();

    if text.is_empty() {
        Ok(SseLine::Skip)
    } else {
        Ok(SseLine::Fragment(text))
    }
}

// ============================================================================
// TESTS
// ============================================================================
