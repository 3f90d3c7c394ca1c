//! AI provider configuration

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::error::ValidationError;
use crate::application::RouterConfig;
use crate::ports::CompletionOptions;

/// AI provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub openai: ProviderSettings,

    #[serde(default)]
    pub anthropic: ProviderSettings,

    /// Comma-separated provider names, highest priority first.
    /// Providers without an API key are skipped.
    #[serde(default = "default_priority")]
    pub priority: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Calls per provider, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Bound on one routed request across every provider, in seconds
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// Credentials and overrides for one provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSettings {
    pub api_key: Option<Secret<String>>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl ProviderSettings {
    /// The key, when present and non-blank.
    pub fn api_key(&self) -> Option<&Secret<String>> {
        self.api_key
            .as_ref()
            .filter(|k| !k.expose_secret().trim().is_empty())
    }

    pub fn is_configured(&self) -> bool {
        self.api_key().is_some()
    }
}

/// AI provider type
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    OpenAI,
    Anthropic,
}

impl AiProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiProvider::OpenAI => "openai",
            AiProvider::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for AiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AiProvider {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(AiProvider::OpenAI),
            "anthropic" => Ok(AiProvider::Anthropic),
            other => Err(ValidationError::UnknownProvider(other.to_string())),
        }
    }
}

impl AiConfig {
    /// Parsed priority list, in order, duplicates rejected.
    pub fn priority(&self) -> Result<Vec<AiProvider>, ValidationError> {
        let mut providers = Vec::new();
        for name in self.priority.split(',').filter(|s| !s.trim().is_empty()) {
            let provider: AiProvider = name.parse()?;
            if providers.contains(&provider) {
                return Err(ValidationError::DuplicateProvider(provider.to_string()));
            }
            providers.push(provider);
        }
        Ok(providers)
    }

    /// Providers from the priority list that have credentials, in order.
    /// Empty means the router runs on its local fallback alone.
    pub fn enabled_providers(&self) -> Result<Vec<AiProvider>, ValidationError> {
        Ok(self
            .priority()?
            .into_iter()
            .filter(|p| self.settings(*p).is_configured())
            .collect())
    }

    pub fn settings(&self, provider: AiProvider) -> &ProviderSettings {
        match provider {
            AiProvider::OpenAI => &self.openai,
            AiProvider::Anthropic => &self.anthropic,
        }
    }

    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            deadline: Duration::from_secs(self.deadline_secs),
        }
    }

    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions::default()
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
            .with_timeout(self.timeout())
    }

    /// Validate AI configuration.
    ///
    /// No configured provider is valid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.priority()?;

        if self.timeout_secs == 0 || self.deadline_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.max_attempts == 0 {
            return Err(ValidationError::InvalidAttempts);
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ValidationError::InvalidBackoff);
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ValidationError::InvalidTemperature);
        }
        if self.max_tokens == 0 {
            return Err(ValidationError::InvalidMaxTokens);
        }

        Ok(())
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            openai: ProviderSettings::default(),
            anthropic: ProviderSettings::default(),
            priority: default_priority(),
            timeout_secs: default_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            deadline_secs: default_deadline(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_priority() -> String {
    "anthropic,openai".to_string()
}

fn default_timeout() -> u64 {
    20
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    200
}

fn default_max_backoff() -> u64 {
    5_000
}

fn default_deadline() -> u64 {
    30
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}
