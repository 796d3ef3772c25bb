//! Text-generation transport: opaque prompt (+ optional image) → raw text.
//!
//! The rest of the crate only sees [`GenerationTransport`]. Which vendor
//! answers is decided once, when the transport is built, and never
//! inspected again downstream.
//!
//! [`LlmTransport`] adapts any `edgequake-llm` provider (OpenAI, Anthropic,
//! Gemini, Ollama, ...) to that contract: one user message with at most one
//! image per call. There is no retry loop; a failed call surfaces as a
//! [`TransportError`] and re-running it is up to the caller.

use crate::error::TransportError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Binary payload sent along with a prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub bytes: Vec<u8>,
    /// e.g. `"image/png"`.
    pub mime_type: String,
}

impl Attachment {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: "image/png".to_string(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// One generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub attachment: Option<Attachment>,
    /// Response-size budget in tokens.
    pub max_tokens: usize,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: usize) -> Self {
        Self {
            prompt: prompt.into(),
            attachment: None,
            max_tokens,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Anything that can turn a prompt into raw response text.
#[async_trait]
pub trait GenerationTransport: Send + Sync {
    /// Short identifier used in logs and error messages.
    fn name(&self) -> &str;

    async fn generate(&self, request: GenerationRequest) -> Result<String, TransportError>;
}

// ── edgequake-llm adapter ────────────────────────────────────────────────

/// [`GenerationTransport`] over an `edgequake-llm` provider.
pub struct LlmTransport {
    provider: Arc<dyn LLMProvider>,
    name: String,
    temperature: f32,
    timeout: Duration,
}

impl LlmTransport {
    pub fn new(provider: Arc<dyn LLMProvider>, name: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
            temperature: 0.1,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_messages(&self, request: &GenerationRequest) -> Result<Vec<ChatMessage>, TransportError> {
        let message = match &request.attachment {
            None => ChatMessage::user(request.prompt.as_str()),
            Some(att) if att.is_image() => {
                let image = ImageData::new(STANDARD.encode(&att.bytes), att.mime_type.as_str())
                    .with_detail("high");
                ChatMessage::user_with_images(request.prompt.as_str(), vec![image])
            }
            Some(att) => {
                return Err(TransportError::MalformedRequest {
                    detail: format!(
                        "provider '{}' only accepts image attachments, got '{}'",
                        self.name, att.mime_type
                    ),
                })
            }
        };
        Ok(vec![message])
    }
}

#[async_trait]
impl GenerationTransport for LlmTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, TransportError> {
        let messages = self.build_messages(&request)?;
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let start = Instant::now();
        let response = tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&options)))
            .await
            .map_err(|_| TransportError::Timeout {
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| {
                let err = classify_error(&self.name, &e.to_string());
                warn!("{}: generation failed: {}", self.name, err);
                err
            })?;

        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            self.name,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

static RE_HTTP_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([45]\d\d)\b").unwrap());

/// Map a provider error message onto the transport taxonomy.
///
/// Providers report failures as free text, so classification works on
/// the rendered message: auth and rate-limit markers first, then any HTTP
/// status code, and everything else is treated as a network failure.
pub fn classify_error(provider: &str, message: &str) -> TransportError {
    let lower = message.to_lowercase();
    let status = RE_HTTP_STATUS
        .captures(&lower)
        .and_then(|c| c[1].parse::<u16>().ok());

    if matches!(status, Some(401 | 403))
        || lower.contains("unauthorized")
        || lower.contains("api key")
        || lower.contains("authentication")
    {
        return TransportError::InvalidCredentials {
            provider: provider.to_string(),
            detail: message.to_string(),
        };
    }
    if status == Some(429) || lower.contains("rate limit") || lower.contains("too many requests") {
        return TransportError::RateLimited {
            provider: provider.to_string(),
        };
    }
    if status == Some(400) || lower.contains("bad request") || lower.contains("invalid request") {
        return TransportError::MalformedRequest {
            detail: message.to_string(),
        };
    }
    if let Some(status) = status {
        return TransportError::Upstream {
            status,
            detail: message.to_string(),
        };
    }
    if lower.contains("timed out") || lower.contains("timeout") {
        return TransportError::Network {
            detail: format!("timeout: {message}"),
        };
    }
    TransportError::Network {
        detail: message.to_string(),
    }
}
