//! Provider Adapters.
//!
//! Implementations of the `ProviderAdapter` port.
//!
//! ## Available Adapters
//!
//! - `OpenAIProvider` - OpenAI chat completions
//! - `AnthropicProvider` - Anthropic Messages API
//! - `ScriptedProvider` - Canned results for tests and demos

mod anthropic_provider;
mod openai_provider;
mod scripted_provider;
mod transport;

pub use anthropic_provider::{AnthropicConfig, AnthropicProvider};
pub use openai_provider::{OpenAIConfig, OpenAIProvider};
pub use scripted_provider::ScriptedProvider;
