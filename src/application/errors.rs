//! Boundary error and notice types.
//!
//! Nothing crosses the core boundary without being mapped to [`CoreError`]
//! (the turn failed) or a [`TurnNotice`] (the turn succeeded, but the caller
//! should know something degraded).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::flow::{FlowError, FlowKind, StepId};
use crate::domain::foundation::{ErrorCode, FlowInstanceId, ValidationError};
use crate::ports::RepositoryError;

/// A failed core operation. The HTTP layer maps `code()` to a status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("validation failed: {}", summarize(.0))]
    Validation(Vec<ValidationError>),

    #[error("a {kind} flow is already in progress")]
    FlowAlreadyActive {
        kind: FlowKind,
        instance: FlowInstanceId,
    },

    #[error("no {kind} flow is in progress")]
    FlowNotActive { kind: FlowKind },

    #[error("{kind} has already been completed")]
    FlowAlreadyCompleted { kind: FlowKind },

    #[error("step '{step}' of {kind} cannot be skipped")]
    StepMandatory { kind: FlowKind, step: StepId },

    /// Concurrent modification that survived the automatic retry, or an
    /// explicit version that no longer matches.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unknown flow kind: {0}")]
    UnknownFlowKind(String),

    /// Details are logged, never shown.
    #[error("internal error")]
    Internal(String),
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CoreError {
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::ValidationFailed,
            Self::UnknownFlowKind(_) => ErrorCode::UnknownFlowKind,
            Self::FlowAlreadyActive { .. } => ErrorCode::FlowAlreadyActive,
            Self::FlowNotActive { .. } => ErrorCode::FlowNotActive,
            Self::FlowAlreadyCompleted { .. } => ErrorCode::FlowAlreadyCompleted,
            Self::StepMandatory { .. } => ErrorCode::StepMandatory,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Maps an engine error. `StaleVersion` becomes `Conflict`; callers that
    /// retry must intercept it first.
    pub fn from_flow(error: FlowError) -> Self {
        match error {
            FlowError::AlreadyActive { kind, instance } => Self::FlowAlreadyActive { kind, instance },
            FlowError::AlreadyCompleted { kind } => Self::FlowAlreadyCompleted { kind },
            FlowError::NotActive { kind } => Self::FlowNotActive { kind },
            FlowError::StepMandatory { kind, step } => Self::StepMandatory { kind, step },
            FlowError::StaleVersion { expected, found } => {
                Self::Conflict(format!("flow changed concurrently (expected v{expected}, found v{found})"))
            }
            FlowError::UnknownKind(kind) => Self::UnknownFlowKind(kind.to_string()),
            other @ (FlowError::NotInProgress { .. }
            | FlowError::SkillPending { .. }
            | FlowError::UnknownStep { .. }
            | FlowError::Storage(_)) => Self::Internal(other.to_string()),
        }
    }
}

impl From<RepositoryError> for CoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Forbidden(reason) => Self::Forbidden(reason),
            RepositoryError::Archived(id) => Self::Forbidden(format!("conversation {id} is archived")),
            RepositoryError::StaleVersion { expected, found } => {
                Self::Conflict(format!("expected v{expected}, found v{found}"))
            }
            RepositoryError::AlreadyActive { kind, instance } => Self::FlowAlreadyActive { kind, instance },
            other @ (RepositoryError::NotFound(_) | RepositoryError::Storage(_)) => {
                Self::Internal(other.to_string())
            }
        }
    }
}

/// Something the caller should surface even though the turn succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnNotice {
    /// No provider answered; the reply is the local fallback.
    Degraded { reason: String },

    /// The input was rejected; nothing changed.
    ValidationError { errors: Vec<ValidationError> },

    /// A skill refused its input; it will be retried on the next turn.
    SkillError { skill: String, reason: String },

    /// A contract bug was logged; the user saw an apology.
    Internal { code: ErrorCode },
}

impl TurnNotice {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Degraded { .. } => ErrorCode::ProviderDegraded,
            Self::ValidationError { .. } => ErrorCode::ValidationFailed,
            Self::SkillError { .. } => ErrorCode::SkillExecutionFailed,
            Self::Internal { code } => *code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_version_maps_to_conflict() {
        let err = CoreError::from_flow(FlowError::StaleVersion { expected: 2, found: 3 });
        assert_eq!(err.code(), ErrorCode::Conflict);
    }

    #[test]
    fn storage_details_stay_internal() {
        let err = CoreError::from(RepositoryError::Storage("connection reset".into()));
        assert_eq!(err.code(), ErrorCode::InternalError);
        assert_eq!(err.to_string(), "internal error");
    }

    #[test]
    fn archived_conversation_is_forbidden() {
        let id = crate::domain::foundation::ConversationId::new();
        let err = CoreError::from(RepositoryError::Archived(id));
        assert_eq!(err.code(), ErrorCode::Forbidden);
    }

    #[test]
    fn validation_message_lists_every_error() {
        let err = CoreError::Validation(vec![
            ValidationError::empty_field("name"),
            ValidationError::empty_field("goal"),
        ]);
        let text = err.to_string();
        assert!(text.contains("name"));
        assert!(text.contains("goal"));
    }

    #[test]
    fn notices_serialize_with_kind_tag() {
        let json = serde_json::to_value(TurnNotice::Degraded {
            reason: "no_providers".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "degraded");
        assert_eq!(
            TurnNotice::SkillError {
                skill: "s".into(),
                reason: "r".into()
            }
            .code(),
            ErrorCode::SkillExecutionFailed
        );
    }
}
