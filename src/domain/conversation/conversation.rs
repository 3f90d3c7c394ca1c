//! Conversation aggregate - an ordered, append-only message log.

use thiserror::Error;

use super::{ConversationState, Message};
use crate::domain::foundation::{ConversationId, StateMachine, Timestamp, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    #[error("conversation {0} is archived")]
    Archived(ConversationId),

    #[error("conversation {conversation} belongs to another user")]
    NotOwned { conversation: ConversationId },
}

/// One user's dialogue with the coach.
///
/// # Invariants
///
/// - owned by exactly one user for its whole life
/// - messages are strictly ordered by `created_at`; nothing is removed or
///   reordered
/// - archived conversations accept no messages
#[derive(Debug, Clone)]
pub struct Conversation {
    id: ConversationId,
    user_id: UserId,
    state: ConversationState,
    messages: Vec<Message>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl Conversation {
    /// Opens a new, empty conversation under a caller-chosen id.
    pub fn open(id: ConversationId, user_id: UserId) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            user_id,
            state: ConversationState::Open,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn reconstitute(
        id: ConversationId,
        user_id: UserId,
        state: ConversationState,
        messages: Vec<Message>,
        created_at: Timestamp,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            id,
            user_id,
            state,
            messages,
            created_at,
            updated_at,
        }
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The trailing `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn ensure_owned_by(&self, user: &UserId) -> Result<(), ConversationError> {
        if &self.user_id == user {
            Ok(())
        } else {
            Err(ConversationError::NotOwned {
                conversation: self.id,
            })
        }
    }

    /// Appends a message, restamping it if the clock did not move forward.
    ///
    /// Returns the stored copy so callers persist exactly what was recorded.
    pub fn append(&mut self, message: Message) -> Result<&Message, ConversationError> {
        if !self.state.accepts_messages() {
            return Err(ConversationError::Archived(self.id));
        }

        let message = match self.messages.last() {
            Some(last) => message.restamped_after(last.created_at()),
            None => message,
        };
        self.updated_at = *message.created_at();
        self.messages.push(message);

        // Just pushed, so last() is Some.
        Ok(&self.messages[self.messages.len() - 1])
    }

    pub fn archive(&mut self) -> Result<(), ConversationError> {
        self.state = self
            .state
            .transition_to(ConversationState::Archived)
            .map_err(|_| ConversationError::Archived(self.id))?;
        self.updated_at = Timestamp::now();
        Ok(())
    }
}
