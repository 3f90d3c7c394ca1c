//! Foundation module - Shared domain primitives.
//!
//! Identifiers, timestamps, validation errors, and the state machine trait
//! that form the vocabulary of the coaching core.

mod errors;
mod ids;
mod state_machine;
mod timestamp;

pub use errors::{ErrorCode, ValidationError};
pub use ids::{ConversationId, FlowInstanceId, MessageId, UserId};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;
