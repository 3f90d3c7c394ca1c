//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Unknown AI provider in priority list: {0}")]
    UnknownProvider(String),

    #[error("AI provider listed twice in priority list: {0}")]
    DuplicateProvider(String),

    #[error("Invalid request timeout")]
    InvalidTimeout,

    #[error("max_attempts must be at least 1")]
    InvalidAttempts,

    #[error("initial backoff exceeds max backoff")]
    InvalidBackoff,

    #[error("temperature must be between 0.0 and 2.0")]
    InvalidTemperature,

    #[error("max_tokens must be at least 1")]
    InvalidMaxTokens,

    #[error("Invalid database URL format")]
    InvalidDatabaseUrl,

    #[error("Pool min_connections exceeds max_connections")]
    InvalidPoolSize,

    #[error("Pool size exceeds maximum allowed (100)")]
    PoolSizeTooLarge,

    #[error("history window must be at least 1")]
    InvalidHistoryWindow,

    #[error("Invalid log filter: {0}")]
    InvalidLogFilter(String),
}
