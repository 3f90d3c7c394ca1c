//! In-Memory Flow Repository
//!
//! Stores flow instances behind one `RwLock`. Every check-and-write happens
//! under the write guard, so the version compare-and-swap is atomic.
//! Useful for tests, demos and single-process deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::flow::{FlowInstance, FlowKind};
use crate::domain::foundation::{FlowInstanceId, UserId};
use crate::ports::{FlowRepository, RepositoryError};

#[derive(Debug, Clone)]
struct Stored {
    /// Insertion order, to break ties between equal start times.
    seq: u64,
    instance: FlowInstance,
}

#[derive(Debug, Default)]
struct State {
    next_seq: u64,
    instances: HashMap<FlowInstanceId, Stored>,
}

/// In-memory storage for flow instances.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFlowRepository {
    state: Arc<RwLock<State>>,
}

impl InMemoryFlowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored instances.
    pub async fn len(&self) -> usize {
        self.state.read().await.instances.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Clear all stored data (useful for tests).
    pub async fn clear(&self) {
        self.state.write().await.instances.clear();
    }
}

impl State {
    fn matching<'a>(
        &'a self,
        user: &'a UserId,
        kind: FlowKind,
    ) -> impl Iterator<Item = &'a Stored> + 'a {
        self.instances
            .values()
            .filter(move |s| s.instance.user_id() == user && s.instance.kind() == kind)
    }
}

#[async_trait]
impl FlowRepository for InMemoryFlowRepository {
    async fn find(&self, id: FlowInstanceId) -> Result<Option<FlowInstance>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.instances.get(&id).map(|s| s.instance.clone()))
    }

    async fn find_latest(
        &self,
        user: &UserId,
        kind: FlowKind,
    ) -> Result<Option<FlowInstance>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .matching(user, kind)
            .max_by_key(|s| (s.instance.started_at(), s.seq))
            .map(|s| s.instance.clone()))
    }

    async fn find_active(
        &self,
        user: &UserId,
        kind: FlowKind,
    ) -> Result<Option<FlowInstance>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .matching(user, kind)
            .filter(|s| s.instance.is_active())
            .max_by_key(|s| (s.instance.started_at(), s.seq))
            .map(|s| s.instance.clone()))
    }

    async fn insert(&self, instance: &FlowInstance, exclusive: bool) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;

        if state.instances.contains_key(&instance.id()) {
            return Err(RepositoryError::storage(format!(
                "flow instance {} already exists",
                instance.id()
            )));
        }

        if exclusive {
            if let Some(active) = state
                .matching(instance.user_id(), instance.kind())
                .find(|s| s.instance.is_active())
            {
                return Err(RepositoryError::AlreadyActive {
                    kind: instance.kind(),
                    instance: active.instance.id(),
                });
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.instances.insert(
            instance.id(),
            Stored {
                seq,
                instance: instance.clone(),
            },
        );
        Ok(())
    }

    async fn update(
        &self,
        instance: &FlowInstance,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;

        let stored = state
            .instances
            .get_mut(&instance.id())
            .ok_or_else(|| RepositoryError::NotFound(format!("flow instance {}", instance.id())))?;

        if stored.instance.user_id() != instance.user_id() {
            return Err(RepositoryError::Forbidden(format!(
                "flow instance {} belongs to another user",
                instance.id()
            )));
        }

        let found = stored.instance.version();
        if found != expected_version {
            return Err(RepositoryError::StaleVersion {
                expected: expected_version,
                found,
            });
        }

        stored.instance = instance.clone();
        Ok(())
    }
}
