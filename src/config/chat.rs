//! Conversation context configuration

use serde::Deserialize;

use super::error::ValidationError;
use crate::application::{PromptBuilder, DEFAULT_HISTORY_WINDOW};

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Most recent transcript messages sent to the provider
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Rough token budget for the assembled prompt
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Replaces the built-in assistant preamble
    pub preamble: Option<String>,
}

impl ChatConfig {
    pub fn prompt_builder(&self) -> PromptBuilder {
        let builder = PromptBuilder::new()
            .with_history_window(self.history_window)
            .with_max_context_tokens(self.max_context_tokens);
        match self.preamble.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(preamble) => builder.with_preamble(preamble),
            None => builder,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.history_window == 0 {
            return Err(ValidationError::InvalidHistoryWindow);
        }
        Ok(())
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            max_context_tokens: default_max_context_tokens(),
            preamble: None,
        }
    }
}

fn default_history_window() -> usize {
    DEFAULT_HISTORY_WINDOW
}

fn default_max_context_tokens() -> usize {
    12_000
}
