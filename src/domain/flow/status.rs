//! Flow instance lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::StateMachine;

/// Status of one flow run.
///
/// `InProgress` is the only non-terminal state; the rest are the
/// distinguished terminal states with no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    #[default]
    InProgress,
    Completed,
    Skipped,
    Abandoned,
}

impl FlowStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, FlowStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::InProgress => "in_progress",
            FlowStatus::Completed => "completed",
            FlowStatus::Skipped => "skipped",
            FlowStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(FlowStatus::InProgress),
            "completed" => Some(FlowStatus::Completed),
            "skipped" => Some(FlowStatus::Skipped),
            "abandoned" => Some(FlowStatus::Abandoned),
            _ => None,
        }
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StateMachine for FlowStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        self.valid_transitions().contains(target)
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use FlowStatus::*;
        match self {
            InProgress => vec![Completed, Skipped, Abandoned],
            Completed | Skipped | Abandoned => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_in_progress_is_active() {
        assert!(FlowStatus::InProgress.is_active());
        assert!(!FlowStatus::Completed.is_active());
        assert!(!FlowStatus::Skipped.is_active());
        assert!(!FlowStatus::Abandoned.is_active());
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for status in [FlowStatus::Completed, FlowStatus::Skipped, FlowStatus::Abandoned] {
            assert!(status.is_terminal());
            assert!(status.transition_to(FlowStatus::InProgress).is_err());
        }
    }

    #[test]
    fn in_progress_reaches_every_terminal() {
        for status in [FlowStatus::Completed, FlowStatus::Skipped, FlowStatus::Abandoned] {
            assert_eq!(FlowStatus::InProgress.transition_to(status), Ok(status));
        }
    }

    #[test]
    fn persisted_form_round_trips() {
        for status in [
            FlowStatus::InProgress,
            FlowStatus::Completed,
            FlowStatus::Skipped,
            FlowStatus::Abandoned,
        ] {
            assert_eq!(FlowStatus::parse(status.as_str()), Some(status));
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }
}
