//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the core to external systems:
//! - `ai` - chat-completion providers (OpenAI, Anthropic) and a scripted test double
//! - `storage` - in-memory repositories
//! - `postgres` - PostgreSQL repositories

pub mod ai;
pub mod postgres;
pub mod storage;

pub use ai::{AnthropicConfig, AnthropicProvider, OpenAIConfig, OpenAIProvider, ScriptedProvider};
pub use postgres::{PostgresConversationRepository, PostgresFlowRepository};
pub use storage::{InMemoryConversationRepository, InMemoryFlowRepository};
