//! Flow policy configuration

use serde::Deserialize;

use super::error::ValidationError;
use crate::application::DEFAULT_MAX_IDLE_DAYS;
use crate::domain::flow::{ActivePolicy, FlowCatalog, FlowKind};

/// Per-kind overrides. A missing entry keeps the built-in policy.
///
/// `COACH__FLOWS__WEEKLY_PLAN=resume` sets the weekly plan policy.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowsConfig {
    pub onboarding: Option<ActivePolicy>,
    pub weekly_plan: Option<ActivePolicy>,
    pub check_in: Option<ActivePolicy>,

    /// Days without activity before an in-progress flow may be abandoned
    #[serde(default = "default_max_idle_days")]
    pub max_idle_days: i64,
}

impl FlowsConfig {
    pub fn policy(&self, kind: FlowKind) -> Option<ActivePolicy> {
        match kind {
            FlowKind::Onboarding => self.onboarding,
            FlowKind::WeeklyPlan => self.weekly_plan,
            FlowKind::CheckIn => self.check_in,
        }
    }

    pub fn max_idle(&self) -> chrono::Duration {
        chrono::Duration::days(self.max_idle_days)
    }

    /// Applies every configured override to `catalog`.
    pub fn apply(&self, catalog: FlowCatalog) -> FlowCatalog {
        FlowKind::ALL.into_iter().fold(catalog, |catalog, kind| match self.policy(kind) {
            Some(policy) => catalog.with_active_policy(kind, policy),
            None => catalog,
        })
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_idle_days < 1 {
            return Err(ValidationError::MissingRequired("FLOWS__MAX_IDLE_DAYS >= 1"));
        }
        Ok(())
    }
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            onboarding: None,
            weekly_plan: None,
            check_in: None,
            max_idle_days: default_max_idle_days(),
        }
    }
}

fn default_max_idle_days() -> i64 {
    DEFAULT_MAX_IDLE_DAYS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_keep_builtin_policies() {
        let catalog = FlowsConfig::default().apply(FlowCatalog::builtin().unwrap());

        assert_eq!(
            catalog.get(FlowKind::Onboarding).unwrap().active_policy(),
            ActivePolicy::Resume
        );
        assert_eq!(
            catalog.get(FlowKind::WeeklyPlan).unwrap().active_policy(),
            ActivePolicy::Reject
        );
    }

    #[test]
    fn test_override_applies_to_one_kind() {
        let config = FlowsConfig {
            weekly_plan: Some(ActivePolicy::AllowConcurrent),
            ..Default::default()
        };

        let catalog = config.apply(FlowCatalog::builtin().unwrap());

        assert_eq!(
            catalog.get(FlowKind::WeeklyPlan).unwrap().active_policy(),
            ActivePolicy::AllowConcurrent
        );
        assert_eq!(
            catalog.get(FlowKind::CheckIn).unwrap().active_policy(),
            ActivePolicy::Resume
        );
    }

    #[test]
    fn test_idle_days_must_be_positive() {
        let config = FlowsConfig {
            max_idle_days: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
