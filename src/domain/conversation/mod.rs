//! Conversation domain module.
//!
//! A conversation is the durable, append-only transcript of a user's turns
//! with the coach. Flow progress lives elsewhere; messages only reference it
//! through their payloads.

mod conversation;
mod message;
mod state;

pub use conversation::{Conversation, ConversationError};
pub use message::{Message, MessagePayload, Role};
pub use state::ConversationState;
