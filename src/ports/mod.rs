//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the core and the outside world. Adapters implement these ports.
//!
//! - `ProviderAdapter` - chat-completion backends (OpenAI, Anthropic, ...)
//! - `FlowRepository` - flow instances with optimistic concurrency
//! - `ConversationRepository` - append-only conversation logs

mod ai_provider;
mod conversation_repository;
mod flow_repository;

pub use ai_provider::{
    CompletionOptions, FinishReason, Prompt, PromptMessage, ProviderAdapter, ProviderError,
    ProviderResponse, TokenUsage,
};
pub use conversation_repository::ConversationRepository;
pub use flow_repository::{FlowRepository, RepositoryError};
