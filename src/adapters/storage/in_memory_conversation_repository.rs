//! In-Memory Conversation Repository
//!
//! Keeps whole conversation aggregates in memory. Appends go through
//! [`Conversation::append`], so ordering rules are the domain's own.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::conversation::{Conversation, ConversationError, ConversationState, Message};
use crate::domain::foundation::{ConversationId, UserId};
use crate::ports::{ConversationRepository, RepositoryError};

/// In-memory storage for conversations.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConversationRepository {
    conversations: Arc<RwLock<HashMap<ConversationId, Conversation>>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl From<ConversationError> for RepositoryError {
    fn from(error: ConversationError) -> Self {
        match error {
            ConversationError::Archived(id) => RepositoryError::Archived(id),
            ConversationError::NotOwned { conversation } => {
                RepositoryError::Forbidden(format!("conversation {conversation} belongs to another user"))
            }
        }
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn ensure_exists(
        &self,
        user: &UserId,
        id: ConversationId,
    ) -> Result<Conversation, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .entry(id)
            .or_insert_with(|| Conversation::open(id, user.clone()));
        conversation.ensure_owned_by(user)?;
        Ok(conversation.clone())
    }

    async fn find(&self, id: ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.conversations.read().await.get(&id).cloned())
    }

    async fn append_messages(
        &self,
        id: ConversationId,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("conversation {id}")))?;

        // The only append failure is archival; checking first keeps the
        // batch all-or-nothing.
        if conversation.state() == ConversationState::Archived {
            return Err(RepositoryError::Archived(id));
        }

        let mut stored = Vec::with_capacity(messages.len());
        for message in messages {
            stored.push(conversation.append(message)?.clone());
        }
        Ok(stored)
    }

    async fn archive(&self, id: ConversationId) -> Result<Conversation, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("conversation {id}")))?;
        if conversation.state() != ConversationState::Archived {
            conversation.archive()?;
        }
        Ok(conversation.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    #[tokio::test]
    async fn ensure_exists_is_idempotent() {
        let repo = InMemoryConversationRepository::new();
        let id = ConversationId::new();

        let first = repo.ensure_exists(&user("ana"), id).await.unwrap();
        repo.append_messages(id, vec![Message::user("hi")]).await.unwrap();
        let second = repo.ensure_exists(&user("ana"), id).await.unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(second.message_count(), 1);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn ensure_exists_rejects_other_owner() {
        let repo = InMemoryConversationRepository::new();
        let id = ConversationId::new();
        repo.ensure_exists(&user("ana"), id).await.unwrap();

        let err = repo.ensure_exists(&user("bo"), id).await.unwrap_err();

        assert!(matches!(err, RepositoryError::Forbidden(_)));
    }

    #[tokio::test]
    async fn appended_messages_are_strictly_ordered() {
        let repo = InMemoryConversationRepository::new();
        let id = ConversationId::new();
        repo.ensure_exists(&user("ana"), id).await.unwrap();

        let stored = repo
            .append_messages(id, vec![Message::user("a"), Message::assistant("b"), Message::user("c")])
            .await
            .unwrap();

        assert_eq!(stored.len(), 3);
        assert!(stored.windows(2).all(|w| w[0].created_at() < w[1].created_at()));
        let conversation = repo.find(id).await.unwrap().unwrap();
        let contents: Vec<&str> = conversation.messages().iter().map(|m| m.content()).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn archived_conversation_refuses_whole_batch() {
        let repo = InMemoryConversationRepository::new();
        let id = ConversationId::new();
        repo.ensure_exists(&user("ana"), id).await.unwrap();
        repo.archive(id).await.unwrap();

        let err = repo
            .append_messages(id, vec![Message::user("late")])
            .await
            .unwrap_err();

        assert_eq!(err, RepositoryError::Archived(id));
        assert_eq!(repo.find(id).await.unwrap().unwrap().message_count(), 0);
    }

    #[tokio::test]
    async fn archive_twice_is_fine() {
        let repo = InMemoryConversationRepository::new();
        let id = ConversationId::new();
        repo.ensure_exists(&user("ana"), id).await.unwrap();

        repo.archive(id).await.unwrap();
        let again = repo.archive(id).await.unwrap();

        assert_eq!(again.state(), ConversationState::Archived);
    }

    #[tokio::test]
    async fn append_to_missing_conversation_is_not_found() {
        let repo = InMemoryConversationRepository::new();
        let err = repo
            .append_messages(ConversationId::new(), vec![Message::user("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }
}
