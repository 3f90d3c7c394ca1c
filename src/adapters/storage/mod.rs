//! Storage adapters.
//!
//! In-memory implementations of the repository ports, for tests and
//! single-process use.

mod in_memory_conversation_repository;
mod in_memory_flow_repository;

pub use in_memory_conversation_repository::InMemoryConversationRepository;
pub use in_memory_flow_repository::InMemoryFlowRepository;
