//! OpenAI Provider - chat completions over HTTP.
//!
//! # Configuration
//!
//! ```ignore
//! let config = OpenAIConfig::new(api_key)
//!     .with_model("gpt-4o-mini")
//!     .with_base_url("https://api.openai.com/v1");
//!
//! let provider = OpenAIProvider::new(config);
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

/// Configuration for the OpenAI provider.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    api_key: Secret<String>,
    pub model: String,
    /// Base URL for the API (default: https://api.openai.com/v1).
    pub base_url: String,
}

impl OpenAIConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Secret::new(api_key.into()),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
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

/// OpenAI chat-completions adapter. One HTTP call per `complete`.
pub struct OpenAIProvider {
    config: OpenAIConfig,
    client: Client,
}

impl OpenAIProvider {
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn to_openai_request(&self, prompt: &Prompt, options: &CompletionOptions) -> OpenAIRequest {
        let system = prompt.system.iter().map(|content| OpenAIMessage {
            role: "system".to_string(),
            content: content.clone(),
        });
        let turns = prompt.messages.iter().map(|msg| OpenAIMessage {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
        });

        OpenAIRequest {
            model: self.config.model.clone(),
            messages: system.chain(turns).collect(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        }
    }

    /// Prices per 1M tokens, in cents.
    fn prices(&self) -> (u64, u64) {
        match self.config.model.as_str() {
            m if m.starts_with("gpt-4o-mini") => (15, 60),
            m if m.starts_with("gpt-4o") => (250, 1000),
            m if m.starts_with("gpt-4-turbo") => (1000, 3000),
            m if m.starts_with("gpt-4") => (3000, 6000),
            m if m.starts_with("gpt-3.5") => (50, 150),
            _ => (250, 1000),
        }
    }

    fn into_response(&self, body: OpenAIResponse) -> Result<ProviderResponse, ProviderError> {
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::invalid_response("no choices in response"))?;

        let content = choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::invalid_response("empty completion"))?;

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        };

        let usage = body
            .usage
            .map(|u| {
                TokenUsage::new(
                    u.prompt_tokens,
                    u.completion_tokens,
                    cost_cents(u.prompt_tokens, u.completion_tokens, self.prices()),
                )
            })
            .unwrap_or_default();

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
impl ProviderAdapter for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> Result<ProviderResponse, ProviderError> {
        let request = self.to_openai_request(prompt, options);

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(self.config.api_key())
            .timeout(options.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, options.timeout))?;

        let response = check_status(response, options.timeout).await?;
        let body: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(format!("undecodable body: {e}")))?;

        self.into_response(body)
    }
}

// ----- OpenAI API Types -----

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    model: String,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
