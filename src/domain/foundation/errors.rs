//! Error types shared across the domain layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Field-level rejection of user input or value object construction.
///
/// These are recoverable: the caller re-prompts the user and nothing is
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("Field '{field}' cannot be empty")]
    EmptyField { field: String },

    #[error("Field '{field}' must be at least {min} characters, got {actual}")]
    TooShort {
        field: String,
        min: usize,
        actual: usize,
    },

    #[error("Field '{field}' must be at most {max} characters, got {actual}")]
    TooLong {
        field: String,
        max: usize,
        actual: usize,
    },

    #[error("Field '{field}' must be between {min} and {max}, got {actual}")]
    OutOfRange {
        field: String,
        min: i64,
        max: i64,
        actual: i64,
    },

    #[error("Field '{field}' has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    #[error("Field '{field}' must be one of: {}", allowed.join(", "))]
    InvalidChoice { field: String, allowed: Vec<String> },

    #[error("Field '{field}' was already answered and cannot be changed")]
    AlreadyRecorded { field: String },
}

impl ValidationError {
    pub fn empty_field(field: impl Into<String>) -> Self {
        ValidationError::EmptyField { field: field.into() }
    }

    pub fn too_short(field: impl Into<String>, min: usize, actual: usize) -> Self {
        ValidationError::TooShort {
            field: field.into(),
            min,
            actual,
        }
    }

    pub fn too_long(field: impl Into<String>, max: usize, actual: usize) -> Self {
        ValidationError::TooLong {
            field: field.into(),
            max,
            actual,
        }
    }

    pub fn out_of_range(field: impl Into<String>, min: i64, max: i64, actual: i64) -> Self {
        ValidationError::OutOfRange {
            field: field.into(),
            min,
            max,
            actual,
        }
    }

    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_choice<S: Into<String>>(
        field: impl Into<String>,
        allowed: impl IntoIterator<Item = S>,
    ) -> Self {
        ValidationError::InvalidChoice {
            field: field.into(),
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn already_recorded(field: impl Into<String>) -> Self {
        ValidationError::AlreadyRecorded { field: field.into() }
    }

    /// Name of the offending field.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::EmptyField { field }
            | ValidationError::TooShort { field, .. }
            | ValidationError::TooLong { field, .. }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::InvalidFormat { field, .. }
            | ValidationError::InvalidChoice { field, .. }
            | ValidationError::AlreadyRecorded { field } => field,
        }
    }
}

/// Stable machine-readable codes for failures crossing the core boundary.
///
/// The HTTP layer maps these to status codes; the core never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Input
    ValidationFailed,

    // Flow lifecycle
    FlowAlreadyActive,
    FlowAlreadyCompleted,
    FlowNotActive,
    StepMandatory,
    UnknownFlowKind,

    // Concurrency
    Conflict,

    // Access
    Forbidden,

    // Notices on successful turns
    ProviderDegraded,
    SkillExecutionFailed,

    // Infrastructure and contract bugs
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::FlowAlreadyActive => "FLOW_ALREADY_ACTIVE",
            ErrorCode::FlowAlreadyCompleted => "FLOW_ALREADY_COMPLETED",
            ErrorCode::FlowNotActive => "FLOW_NOT_ACTIVE",
            ErrorCode::StepMandatory => "STEP_MANDATORY",
            ErrorCode::UnknownFlowKind => "UNKNOWN_FLOW_KIND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::ProviderDegraded => "PROVIDER_DEGRADED",
            ErrorCode::SkillExecutionFailed => "SKILL_EXECUTION_FAILED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_field_displays_field_name() {
        let err = ValidationError::empty_field("goal");
        assert_eq!(err.to_string(), "Field 'goal' cannot be empty");
    }

    #[test]
    fn too_short_displays_bounds() {
        let err = ValidationError::too_short("name", 2, 1);
        assert_eq!(
            err.to_string(),
            "Field 'name' must be at least 2 characters, got 1"
        );
    }

    #[test]
    fn invalid_choice_lists_allowed_values() {
        let err = ValidationError::invalid_choice("language", ["en", "pt-BR"]);
        assert_eq!(err.to_string(), "Field 'language' must be one of: en, pt-BR");
    }

    #[test]
    fn field_accessor_covers_every_variant() {
        let errors = vec![
            ValidationError::empty_field("a"),
            ValidationError::too_short("a", 1, 0),
            ValidationError::too_long("a", 1, 2),
            ValidationError::out_of_range("a", 1, 5, 9),
            ValidationError::invalid_format("a", "bad"),
            ValidationError::invalid_choice("a", ["x"]),
            ValidationError::already_recorded("a"),
        ];
        assert!(errors.iter().all(|e| e.field() == "a"));
    }

    #[test]
    fn validation_error_serializes_with_kind_tag() {
        let json = serde_json::to_value(ValidationError::empty_field("goal")).unwrap();
        assert_eq!(json["kind"], "empty_field");
        assert_eq!(json["field"], "goal");
    }

    #[test]
    fn error_code_display_is_screaming_snake() {
        assert_eq!(ErrorCode::FlowAlreadyActive.to_string(), "FLOW_ALREADY_ACTIVE");
        assert_eq!(ErrorCode::Conflict.to_string(), "CONFLICT");
    }
}
