//! Registry of flow definitions keyed by kind.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{builtin, ActivePolicy, DefinitionError, FlowDefinition, FlowError, FlowKind};

/// The step tables the engine runs, one per flow kind.
#[derive(Debug, Clone, Default)]
pub struct FlowCatalog {
    definitions: BTreeMap<FlowKind, Arc<FlowDefinition>>,
}

impl FlowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Onboarding, weekly plan and check-in with their default policies.
    pub fn builtin() -> Result<Self, DefinitionError> {
        Ok(Self::new()
            .with_definition(builtin::onboarding()?)
            .with_definition(builtin::weekly_plan()?)
            .with_definition(builtin::check_in()?))
    }

    /// Adds or replaces the definition for its kind.
    pub fn with_definition(mut self, definition: FlowDefinition) -> Self {
        self.definitions.insert(definition.kind(), Arc::new(definition));
        self
    }

    /// Overrides the "already active" policy of a registered kind.
    pub fn with_active_policy(mut self, kind: FlowKind, policy: ActivePolicy) -> Self {
        if let Some(def) = self.definitions.remove(&kind) {
            let def = Arc::try_unwrap(def)
                .unwrap_or_else(|shared| (*shared).clone())
                .with_active_policy(policy);
            self.definitions.insert(kind, Arc::new(def));
        }
        self
    }

    pub fn get(&self, kind: FlowKind) -> Result<&Arc<FlowDefinition>, FlowError> {
        self.definitions.get(&kind).ok_or(FlowError::UnknownKind(kind))
    }

    /// Registered kinds in declaration order.
    pub fn kinds(&self) -> impl Iterator<Item = FlowKind> + '_ {
        self.definitions.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
