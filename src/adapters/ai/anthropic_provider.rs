//! Anthropic Provider - Messages API over HTTP.
//!
//! # Configuration
//!
//! ```ignore
//! let config = AnthropicConfig::new(api_key)
//!     .with_model("claude-3-5-haiku-latest")
//!     .with_base_url("https://api.anthropic.com");
//!
//! let provider = AnthropicProvider::new(config);
//! ```

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

use super::transport::{check_status, cost_cents, transport_error};
use crate::domain::conversation::Role;
use crate::ports::{
    CompletionOptions, FinishReason, Prompt, ProviderAdapter, ProviderError, ProviderResponse,
    TokenUsage,
};

/// Anthropic API version header value.
const ANTHROPIC_API_VERSION: &str = "2023-06-01";

/// The Messages API requires `max_tokens`.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Configuration for the Anthropic provider.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    api_key: Secret<String>,
    pub model: String,
    /// Base URL for the API (default: https://api.anthropic.com).
    pub base_url: String,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Secret::new(api_key.into()),
            model: "claude-3-5-haiku-latest".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
        }
    }

    pub fn from_secret(api_key: Secret<String>) -> Self {
        Self {
            api_key,
            ..Self::new(String::new())
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

/// Anthropic Messages adapter. One HTTP call per `complete`.
pub struct AnthropicProvider {
    config: AnthropicConfig,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }

    /// System-role turns move into the top-level `system` field, and the
    /// message list must open with a user turn.
    fn to_anthropic_request(&self, prompt: &Prompt, options: &CompletionOptions) -> AnthropicRequest {
        let mut system: Vec<String> = prompt.system.iter().cloned().collect();
        let mut messages = Vec::new();

        for msg in &prompt.messages {
            match msg.role {
                Role::System => system.push(msg.content.clone()),
                Role::User | Role::Assistant => messages.push(AnthropicMessage {
                    role: msg.role.as_str().to_string(),
                    content: msg.content.clone(),
                }),
            }
        }

        if messages.first().map(|m| m.role != "user").unwrap_or(true) {
            messages.insert(
                0,
                AnthropicMessage {
                    role: "user".to_string(),
                    content: "Hello".to_string(),
                },
            );
        }

        AnthropicRequest {
            model: self.config.model.clone(),
            messages,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: options.temperature,
        }
    }

    /// Prices per 1M tokens, in cents.
    fn prices(&self) -> (u64, u64) {
        match self.config.model.as_str() {
            m if m.contains("opus") => (1500, 7500),
            m if m.contains("sonnet") => (300, 1500),
            m if m.contains("haiku") => (80, 400),
            _ => (300, 1500),
        }
    }

    fn into_response(&self, body: AnthropicResponse) -> Result<ProviderResponse, ProviderError> {
        let content = body
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if content.trim().is_empty() {
            return Err(ProviderError::invalid_response("no text content"));
        }

        let finish_reason = match body.stop_reason.as_deref() {
            Some("max_tokens") => FinishReason::Length,
            _ => FinishReason::Stop,
        };

        let usage = TokenUsage::new(
            body.usage.input_tokens,
            body.usage.output_tokens,
            cost_cents(body.usage.input_tokens, body.usage.output_tokens, self.prices()),
        );

        Ok(ProviderResponse {
            provider: self.name().to_string(),
            model: body.model,
            content,
            usage,
            finish_reason,
        })
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<ProviderResponse, ProviderError> {
        let request = self.to_anthropic_request(prompt, options);

        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", self.config.api_key())
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .timeout(options.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, options.timeout))?;

        let response = check_status(response, options.timeout).await?;
        let body: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(format!("undecodable body: {e}")))?;

        self.into_response(body)
    }
}

// ----- Anthropic API Types -----

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
