//! Application configuration module
//!
//! Type-safe configuration loaded from environment variables with the
//! `config` and `dotenvy` crates. Variables use the `COACH` prefix and
//! nested values are separated by double underscores.
//!
//! # Example
//!
//! ```no_run
//! use coach_core::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod ai;
mod chat;
mod database;
mod error;
mod flows;
mod logging;

pub use ai::{AiConfig, AiProvider, ProviderSettings};
pub use chat::ChatConfig;
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use flows::FlowsConfig;
pub use logging::LoggingConfig;

use serde::Deserialize;

/// Root application configuration
///
/// Every section has defaults, so an empty environment loads a working
/// in-memory core that answers from its local fallback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Provider credentials, priority order and routing bounds
    #[serde(default)]
    pub ai: AiConfig,

    /// Per flow kind "already active" policies
    #[serde(default)]
    pub flows: FlowsConfig,

    /// Optional PostgreSQL storage
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub chat: ChatConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `COACH` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `COACH__AI__ANTHROPIC__API_KEY=...` -> `ai.anthropic.api_key`
    /// - `COACH__DATABASE__URL=...` -> `database.url`
    /// - `COACH__FLOWS__CHECK_IN=reject` -> `flows.check_in`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("COACH").separator("__"))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for the first invalid section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.ai.validate()?;
        self.flows.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.chat.validate()?;
        Ok(())
    }
}
