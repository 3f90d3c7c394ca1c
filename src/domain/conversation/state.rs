//! Conversation lifecycle.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::StateMachine;

/// Lifecycle of a conversation: open until archived, archived forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// Accepting new turns.
    #[default]
    Open,

    /// Read-only history.
    Archived,
}

impl ConversationState {
    pub fn accepts_messages(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Archived => "archived",
        }
    }

    /// Parses the persisted representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

impl StateMachine for ConversationState {
    fn can_transition_to(&self, target: &Self) -> bool {
        matches!((self, target), (Self::Open, Self::Archived))
    }

    fn valid_transitions(&self) -> Vec<Self> {
        match self {
            Self::Open => vec![Self::Archived],
            Self::Archived => vec![],
        }
    }
}
