//! Flow repository port.
//!
//! Persists [`FlowInstance`]s with optimistic concurrency. The version check
//! is the only serialization point between concurrent turns for the same
//! (user, flow kind); implementations must make it atomic.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::flow::{FlowInstance, FlowKind};
use crate::domain::foundation::{ConversationId, FlowInstanceId, UserId};

/// Storage failures shared by the repository ports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),

    /// Someone else wrote first.
    #[error("stale version: expected {expected}, found {found}")]
    StaleVersion { expected: u64, found: u64 },

    #[error("a {kind} flow is already active ({instance})")]
    AlreadyActive {
        kind: FlowKind,
        instance: FlowInstanceId,
    },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conversation {0} is archived")]
    Archived(ConversationId),

    #[error("storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    pub fn storage(message: impl std::fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }
}

#[async_trait]
pub trait FlowRepository: Send + Sync {
    async fn find(&self, id: FlowInstanceId) -> Result<Option<FlowInstance>, RepositoryError>;

    /// Most recently started instance of `kind` for `user`, in any status.
    async fn find_latest(
        &self,
        user: &UserId,
        kind: FlowKind,
    ) -> Result<Option<FlowInstance>, RepositoryError>;

    /// The in-progress instance of `kind` for `user`, if any.
    async fn find_active(
        &self,
        user: &UserId,
        kind: FlowKind,
    ) -> Result<Option<FlowInstance>, RepositoryError>;

    /// Stores a new instance.
    ///
    /// With `exclusive`, fails with `AlreadyActive` when another in-progress
    /// instance of the same kind exists for the user. The check and the
    /// insert are one atomic step.
    async fn insert(&self, instance: &FlowInstance, exclusive: bool) -> Result<(), RepositoryError>;

    /// Replaces the stored instance if its version still equals
    /// `expected_version`.
    ///
    /// # Errors
    ///
    /// - `StaleVersion` carrying the stored version when it moved on
    /// - `NotFound` if the instance was never inserted
    async fn update(
        &self,
        instance: &FlowInstance,
        expected_version: u64,
    ) -> Result<(), RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_repository_is_object_safe() {
        fn _accepts_dyn(_repo: &dyn FlowRepository) {}
    }
}
