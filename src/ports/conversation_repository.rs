//! Conversation repository port.
//!
//! Conversations are append-only: the port exposes no way to rewrite or
//! delete a message.

use async_trait::async_trait;

use super::RepositoryError;
use crate::domain::conversation::{Conversation, Message};
use crate::domain::foundation::{ConversationId, UserId};

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Returns the conversation, creating it empty on first access.
    ///
    /// Idempotent. Fails with `Forbidden` if `id` belongs to another user.
    async fn ensure_exists(
        &self,
        user: &UserId,
        id: ConversationId,
    ) -> Result<Conversation, RepositoryError>;

    async fn find(&self, id: ConversationId) -> Result<Option<Conversation>, RepositoryError>;

    /// Appends messages atomically, in order.
    ///
    /// Returns the stored copies; timestamps may have been moved forward to
    /// keep the log strictly ordered.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the conversation doesn't exist
    /// - `Archived` if it no longer accepts messages
    async fn append_messages(
        &self,
        id: ConversationId,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, RepositoryError>;

    /// Archives the conversation. Archiving twice is not an error.
    async fn archive(&self, id: ConversationId) -> Result<Conversation, RepositoryError>;
}
