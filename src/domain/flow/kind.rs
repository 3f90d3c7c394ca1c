//! Flow kinds known to the core.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::ValidationError;

/// A named, step-sequenced guided conversation.
///
/// Declaration order is also the order in which the orchestrator looks for an
/// active flow when a turn does not name one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Onboarding,
    WeeklyPlan,
    CheckIn,
}

impl FlowKind {
    pub const ALL: [FlowKind; 3] = [FlowKind::Onboarding, FlowKind::WeeklyPlan, FlowKind::CheckIn];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKind::Onboarding => "onboarding",
            FlowKind::WeeklyPlan => "weekly_plan",
            FlowKind::CheckIn => "check_in",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        FlowKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                ValidationError::invalid_choice("flow_kind", FlowKind::ALL.map(|k| k.as_str()))
            })
    }
}
