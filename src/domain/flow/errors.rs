//! Flow engine errors.

use thiserror::Error;

use super::{FlowKind, FlowStatus, StepId};
use crate::domain::foundation::FlowInstanceId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("a {kind} flow is already in progress ({instance})")]
    AlreadyActive { kind: FlowKind, instance: FlowInstanceId },

    #[error("{kind} has already been completed")]
    AlreadyCompleted { kind: FlowKind },

    #[error("no {kind} flow is in progress")]
    NotActive { kind: FlowKind },

    #[error("flow is {} and accepts no further input", status.as_str())]
    NotInProgress { status: FlowStatus },

    #[error("step '{step}' of {kind} is mandatory and cannot be skipped")]
    StepMandatory { kind: FlowKind, step: StepId },

    #[error("skill '{skill}' must finish before the flow continues")]
    SkillPending { skill: String },

    #[error("step '{step}' is not defined for {kind}")]
    UnknownStep { kind: FlowKind, step: StepId },

    #[error("no definition registered for {0}")]
    UnknownKind(FlowKind),

    #[error("stale version: expected {expected}, found {found}")]
    StaleVersion { expected: u64, found: u64 },

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Reasons a flow definition fails to build.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("{0} has no steps")]
    Empty(FlowKind),

    #[error("{kind} defines step '{step}' twice")]
    DuplicateStep { kind: FlowKind, step: StepId },

    #[error("{kind}: step '{from}' transitions to unknown step '{target}'")]
    UnknownTarget {
        kind: FlowKind,
        from: StepId,
        target: StepId,
    },

    #[error("{kind}: skip landing '{step}' is not a defined step")]
    UnknownSkipLanding { kind: FlowKind, step: StepId },
}
