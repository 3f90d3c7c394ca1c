//! Provider Adapter Port - uniform interface over chat-completion backends.
//!
//! Adapters translate a provider-agnostic [`Prompt`] into one HTTP call and
//! map every failure into the closed [`ProviderError`] taxonomy. They never
//! retry; backoff is the router's job so it stays uniform across providers.
//!
//! # Example
//!
//! ```ignore
//! use async_trait::async_trait;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl ProviderAdapter for Echo {
//!     fn name(&self) -> &str { "echo" }
//!
//!     async fn complete(
//!         &self,
//!         prompt: &Prompt,
//!         _options: &CompletionOptions,
//!     ) -> Result<ProviderResponse, ProviderError> {
//!         let text = prompt.last_user_content().unwrap_or_default().to_string();
//!         Ok(ProviderResponse::new("echo", "echo-1", text))
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::domain::conversation::Role;

/// Port for AI chat-completion backends.
///
/// Implementations are stateless with respect to a request and safe to share
/// across concurrent turns.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable identifier used in logs and responses (e.g. "openai").
    fn name(&self) -> &str;

    /// Generates a single completion. Exactly one upstream call.
    async fn complete(
        &self,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<ProviderResponse, ProviderError>;
}

/// Provider-agnostic conversation handed to an adapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    pub system: Option<String>,
    pub messages: Vec<PromptMessage>,
}

impl Prompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_message(mut self, role: Role, content: impl Into<String>) -> Self {
        self.messages.push(PromptMessage {
            role,
            content: content.into(),
        });
        self
    }

    pub fn last_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

/// Per-request knobs. `timeout` bounds one attempt; the router may shorten it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            max_tokens: Some(1024),
            timeout: Duration::from_secs(20),
        }
    }
}

impl CompletionOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Successful completion from one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Adapter that produced the text.
    pub provider: String,
    pub model: String,
    pub content: String,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
}

impl ProviderResponse {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            content: content.into(),
            usage: TokenUsage::default(),
            finish_reason: FinishReason::Stop,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    /// False when the model stopped early or was filtered.
    pub fn is_complete(&self) -> bool {
        self.finish_reason == FinishReason::Stop
    }
}

/// Token usage information for cost tracking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// Estimated cost in cents.
    pub estimated_cost_cents: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32, cost_cents: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            estimated_cost_cents: cost_cents,
        }
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ContentFilter,
}

/// Closed failure taxonomy every adapter maps into.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication rejected: {0}")]
    AuthInvalid(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn rate_limited() -> Self {
        Self::RateLimited { retry_after: None }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    /// Worth another attempt on the same adapter.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Unavailable(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::AuthInvalid(_) => "auth_invalid",
            Self::Timeout(_) => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }

    /// Maps an HTTP status to the taxonomy. `None` for success codes.
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Option<Self> {
        let snippet: String = body.chars().take(200).collect();
        match status {
            200..=299 => None,
            401 | 403 => Some(Self::AuthInvalid(format!("status {status}"))),
            429 => Some(Self::RateLimited { retry_after }),
            408 | 504 => Some(Self::Timeout(Duration::ZERO)),
            500..=599 => Some(Self::Unavailable(format!("status {status}: {snippet}"))),
            _ => Some(Self::InvalidResponse(format!("status {status}: {snippet}"))),
        }
    }
}
