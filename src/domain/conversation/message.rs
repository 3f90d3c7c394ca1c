//! Message entity for conversations.
//!
//! Messages are immutable records of one turn. Beyond role and text they may
//! carry a structured payload: a skill result, validation errors, a degraded
//! notice, and so on.

use serde::{Deserialize, Serialize};

use crate::domain::flow::{FlowKind, FlowStatus};
use crate::domain::foundation::{ErrorCode, MessageId, Timestamp, ValidationError};
use crate::domain::skills::SkillInvocation;

/// Role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// Structured attachment rendered alongside the message text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    /// Outcome of a deterministic skill run.
    Skill { invocation: SkillInvocation },

    /// The user's input was rejected by the current step.
    ValidationErrors {
        step: String,
        errors: Vec<ValidationError>,
    },

    /// Every provider failed; the text is the local fallback.
    Degraded { reason: String },

    /// The turn moved a flow.
    FlowUpdate {
        kind: FlowKind,
        step: String,
        status: FlowStatus,
        version: u64,
    },

    /// Something internal went wrong; details were logged, not shown.
    Apology { code: ErrorCode },
}

/// An immutable message within a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    role: Role,
    content: String,
    created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<MessagePayload>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            created_at: Timestamp::now(),
            payload: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Attaches a payload. Only meaningful before the message is appended.
    pub fn with_payload(mut self, payload: MessagePayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Rebuilds a message loaded from storage.
    pub fn reconstitute(
        id: MessageId,
        role: Role,
        content: String,
        created_at: Timestamp,
        payload: Option<MessagePayload>,
    ) -> Self {
        Self {
            id,
            role,
            content,
            created_at,
            payload,
        }
    }

    pub(crate) fn restamped_after(mut self, floor: &Timestamp) -> Self {
        self.created_at = self.created_at.strictly_after(floor);
        self
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn created_at(&self) -> &Timestamp {
        &self.created_at
    }

    pub fn payload(&self) -> Option<&MessagePayload> {
        self.payload.as_ref()
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    /// True when the text came from the local fallback instead of a provider.
    pub fn is_degraded(&self) -> bool {
        matches!(self.payload, Some(MessagePayload::Degraded { .. }))
    }
}
