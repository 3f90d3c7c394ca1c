//! Flow engine: the persisted side of the flow state machine.
//!
//! Domain transitions are pure ([`FlowInstance::submit`] and friends); this
//! type loads instances, applies the per-kind start policies and writes the
//! results back with a version compare-and-swap.

use chrono::Duration;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::flow::{
    ActivePolicy, FlowCatalog, FlowDefinition, FlowError, FlowInstance, FlowKind, FlowStatus,
    FlowView, RawInput, Submission,
};
use crate::domain::foundation::{FlowInstanceId, Timestamp, UserId};
use crate::ports::{FlowRepository, RepositoryError};

/// Idle time after which an in-progress instance counts as stale.
pub const DEFAULT_MAX_IDLE_DAYS: i64 = 7;

impl From<RepositoryError> for FlowError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::StaleVersion { expected, found } => {
                FlowError::StaleVersion { expected, found }
            }
            RepositoryError::AlreadyActive { kind, instance } => {
                FlowError::AlreadyActive { kind, instance }
            }
            other => FlowError::Storage(other.to_string()),
        }
    }
}

/// How `start` satisfied the request.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started(FlowInstance),
    /// An in-progress instance existed and the kind's policy is `Resume`.
    Resumed(FlowInstance),
}

impl StartOutcome {
    pub fn instance(&self) -> &FlowInstance {
        match self {
            Self::Started(instance) | Self::Resumed(instance) => instance,
        }
    }

    pub fn into_instance(self) -> FlowInstance {
        match self {
            Self::Started(instance) | Self::Resumed(instance) => instance,
        }
    }

    pub fn is_resumed(&self) -> bool {
        matches!(self, Self::Resumed(_))
    }
}

/// Loads, transitions and persists flow instances.
#[derive(Clone)]
pub struct FlowEngine {
    repository: Arc<dyn FlowRepository>,
    catalog: Arc<FlowCatalog>,
    max_idle: Duration,
}

impl FlowEngine {
    pub fn new(repository: Arc<dyn FlowRepository>, catalog: Arc<FlowCatalog>) -> Self {
        Self {
            repository,
            catalog,
            max_idle: Duration::days(DEFAULT_MAX_IDLE_DAYS),
        }
    }

    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn catalog(&self) -> &FlowCatalog {
        &self.catalog
    }

    pub fn max_idle(&self) -> Duration {
        self.max_idle
    }

    pub fn definition(&self, kind: FlowKind) -> Result<Arc<FlowDefinition>, FlowError> {
        self.catalog.get(kind).cloned()
    }

    /// Starts a flow, honoring the kind's active policy and repeatability.
    pub async fn start(
        &self,
        user: &UserId,
        kind: FlowKind,
        now: Timestamp,
    ) -> Result<StartOutcome, FlowError> {
        let definition = self.definition(kind)?;
        let policy = definition.active_policy();

        if let Some(active) = self.repository.find_active(user, kind).await? {
            match policy {
                ActivePolicy::Reject => {
                    return Err(FlowError::AlreadyActive {
                        kind,
                        instance: active.id(),
                    })
                }
                ActivePolicy::Resume => {
                    debug!(flow_kind = %kind, instance = %active.id(), "resuming active flow");
                    return Ok(StartOutcome::Resumed(active));
                }
                ActivePolicy::AllowConcurrent => {}
            }
        }

        if !definition.repeatable() {
            if let Some(latest) = self.repository.find_latest(user, kind).await? {
                if latest.status() == FlowStatus::Completed {
                    return Err(FlowError::AlreadyCompleted { kind });
                }
            }
        }

        let instance = FlowInstance::begin(&definition, user.clone(), now);
        let exclusive = policy != ActivePolicy::AllowConcurrent;
        match self.repository.insert(&instance, exclusive).await {
            Ok(()) => {
                info!(
                    flow_kind = %kind,
                    instance = %instance.id(),
                    user_id = %user,
                    "flow started"
                );
                Ok(StartOutcome::Started(instance))
            }
            // Lost a race with another start for the same user and kind.
            Err(RepositoryError::AlreadyActive { instance: winner, .. })
                if policy == ActivePolicy::Resume =>
            {
                let existing = self
                    .repository
                    .find(winner)
                    .await?
                    .ok_or_else(|| FlowError::Storage(format!("flow instance {winner} vanished")))?;
                Ok(StartOutcome::Resumed(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Validates and persists one submission against `instance`.
    ///
    /// Rejections are returned without touching storage. A concurrent writer
    /// surfaces as `FlowError::StaleVersion`.
    pub async fn submit(
        &self,
        instance: &FlowInstance,
        input: &RawInput,
        now: Timestamp,
    ) -> Result<Submission, FlowError> {
        let definition = self.definition(instance.kind())?;
        let submission = instance.submit(&definition, input, now)?;

        if let Submission::Advanced {
            instance: next,
            transition,
        } = &submission
        {
            self.repository.update(next, instance.version()).await?;
            info!(
                flow_kind = %next.kind(),
                instance = %next.id(),
                from = %transition.from,
                to = %transition.to,
                completed = transition.completed,
                version = next.version(),
                "flow step advanced"
            );
        } else {
            debug!(flow_kind = %instance.kind(), step = %instance.current_step(), "step input rejected");
        }

        Ok(submission)
    }

    /// Applies the kind's skip policy to the active instance.
    pub async fn skip(
        &self,
        user: &UserId,
        kind: FlowKind,
        now: Timestamp,
    ) -> Result<FlowInstance, FlowError> {
        let definition = self.definition(kind)?;
        let current = self
            .repository
            .find_active(user, kind)
            .await?
            .ok_or(FlowError::NotActive { kind })?;

        let next = current.skip(&definition, now)?;
        self.repository.update(&next, current.version()).await?;
        info!(
            flow_kind = %kind,
            instance = %next.id(),
            from = %current.current_step(),
            status = next.status().as_str(),
            "flow step skipped"
        );
        Ok(next)
    }

    /// Marks `instance` abandoned.
    pub async fn abandon(
        &self,
        instance: &FlowInstance,
        now: Timestamp,
    ) -> Result<FlowInstance, FlowError> {
        let next = instance.abandon(now)?;
        self.repository.update(&next, instance.version()).await?;
        info!(flow_kind = %next.kind(), instance = %next.id(), "flow abandoned");
        Ok(next)
    }

    /// Abandons the active instance of `kind` if it has been idle too long.
    /// Intended for an external scheduler.
    pub async fn abandon_if_stale(
        &self,
        user: &UserId,
        kind: FlowKind,
        now: Timestamp,
    ) -> Result<Option<FlowInstance>, FlowError> {
        match self.repository.find_active(user, kind).await? {
            Some(active) if active.is_stale(now, self.max_idle) => {
                self.abandon(&active, now).await.map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Persists the instance with its owed skill cleared. Returns the
    /// instance unchanged when nothing was pending.
    pub async fn resolve_pending_skill(
        &self,
        instance: &FlowInstance,
        now: Timestamp,
    ) -> Result<FlowInstance, FlowError> {
        let Some(next) = instance.resolve_pending_skill(now) else {
            return Ok(instance.clone());
        };
        self.repository.update(&next, instance.version()).await?;
        debug!(flow_kind = %next.kind(), instance = %next.id(), "pending skill resolved");
        Ok(next)
    }

    pub async fn find(&self, id: FlowInstanceId) -> Result<Option<FlowInstance>, FlowError> {
        Ok(self.repository.find(id).await?)
    }

    pub async fn active(
        &self,
        user: &UserId,
        kind: FlowKind,
    ) -> Result<Option<FlowInstance>, FlowError> {
        Ok(self.repository.find_active(user, kind).await?)
    }

    /// Most recently started instance of `kind`, in any status.
    pub async fn latest(
        &self,
        user: &UserId,
        kind: FlowKind,
    ) -> Result<Option<FlowInstance>, FlowError> {
        Ok(self.repository.find_latest(user, kind).await?)
    }

    /// First catalog kind whose latest instance is active or still owes a
    /// skill.
    pub async fn needing_attention(&self, user: &UserId) -> Result<Option<FlowInstance>, FlowError> {
        let lookups = self
            .catalog
            .kinds()
            .map(|kind| self.repository.find_latest(user, kind));
        let latest = try_join_all(lookups).await?;
        Ok(latest.into_iter().flatten().find(FlowInstance::needs_attention))
    }

    pub fn view(&self, instance: &FlowInstance) -> Result<FlowView, FlowError> {
        let definition = self.definition(instance.kind())?;
        Ok(FlowView::of(instance, &definition))
    }
}

impl std::fmt::Debug for FlowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEngine")
            .field("kinds", &self.catalog.kinds().collect::<Vec<_>>())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}
