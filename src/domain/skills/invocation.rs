//! Skill invocation value objects.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::flow::FlowKind;
use crate::domain::foundation::{Timestamp, UserId};
use crate::domain::profile::UserProfile;

/// Explicit state a handler may read. Handlers see nothing else.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillContext {
    pub user_id: UserId,
    /// Clock reading taken once by the caller, so handlers stay deterministic.
    pub now: Timestamp,
    pub flow: Option<FlowKind>,
    pub profile: Option<UserProfile>,
}

impl SkillContext {
    pub fn new(user_id: UserId, now: Timestamp) -> Self {
        Self {
            user_id,
            now,
            flow: None,
            profile: None,
        }
    }

    pub fn in_flow(mut self, kind: FlowKind) -> Self {
        self.flow = Some(kind);
        self
    }

    pub fn with_profile(mut self, profile: Option<UserProfile>) -> Self {
        self.profile = profile;
        self
    }
}

/// A handler's own refusal, reported as a failed invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SkillFailure(pub String);

impl SkillFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SkillOutcome {
    Succeeded { output: Value },
    Failed { reason: String },
}

/// One call of a skill: what was asked, and what came back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillInvocation {
    pub skill: String,
    pub args: Value,
    pub outcome: SkillOutcome,
    pub invoked_at: Timestamp,
}

impl SkillInvocation {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, SkillOutcome::Succeeded { .. })
    }

    pub fn output(&self) -> Option<&Value> {
        match &self.outcome {
            SkillOutcome::Succeeded { output } => Some(output),
            SkillOutcome::Failed { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.outcome {
            SkillOutcome::Succeeded { .. } => None,
            SkillOutcome::Failed { reason } => Some(reason),
        }
    }

    /// The `summary` string a skill chose to expose, if any.
    pub fn summary(&self) -> Option<&str> {
        self.output()?.get("summary")?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invocation(outcome: SkillOutcome) -> SkillInvocation {
        SkillInvocation {
            skill: "demo".into(),
            args: json!({}),
            outcome,
            invoked_at: Timestamp::now(),
        }
    }

    #[test]
    fn success_exposes_output_and_summary() {
        let inv = invocation(SkillOutcome::Succeeded {
            output: json!({"summary": "done", "n": 1}),
        });
        assert!(inv.is_success());
        assert_eq!(inv.summary(), Some("done"));
        assert_eq!(inv.failure_reason(), None);
    }

    #[test]
    fn failure_exposes_reason() {
        let inv = invocation(SkillOutcome::Failed {
            reason: "calendar offline".into(),
        });
        assert!(!inv.is_success());
        assert_eq!(inv.output(), None);
        assert_eq!(inv.failure_reason(), Some("calendar offline"));
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(SkillOutcome::Failed { reason: "x".into() }).unwrap();
        assert_eq!(json, json!({"status": "failed", "reason": "x"}));
    }
}
