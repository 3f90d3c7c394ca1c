//! Flow definitions: the declarative step table plus per-kind policies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::{DefinitionError, FlowKind, FlowStatus, StepData, StepDefinition, StepId, Transition};

/// What `start` does when the user already has an in-progress instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivePolicy {
    /// Fail with `FlowAlreadyActive`.
    #[default]
    Reject,
    /// Hand back the existing instance, flagged as resumed.
    Resume,
    /// Create another instance alongside the existing one.
    AllowConcurrent,
}

/// Where `skip` sends an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipPolicy {
    /// Leave the flow: land on `landing` with status `skipped`.
    EndFlow { landing: StepId },
    /// Move past the current step without recording anything.
    NextStep,
}

/// Where a transition resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Step(StepId),
    Finish,
}

/// A flow kind's validated step table and policies.
#[derive(Debug, Clone)]
pub struct FlowDefinition {
    kind: FlowKind,
    steps: Vec<StepDefinition>,
    index: HashMap<StepId, usize>,
    skip: SkipPolicy,
    active_policy: ActivePolicy,
    repeatable: bool,
}

impl FlowDefinition {
    pub fn builder(kind: FlowKind) -> FlowDefinitionBuilder {
        FlowDefinitionBuilder {
            kind,
            steps: Vec::new(),
            skip: SkipPolicy::NextStep,
            active_policy: ActivePolicy::default(),
            repeatable: true,
        }
    }

    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    /// The designated initial step.
    pub fn first_step(&self) -> &StepDefinition {
        // The builder rejects empty tables.
        &self.steps[0]
    }

    pub fn step(&self, id: &StepId) -> Option<&StepDefinition> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    pub fn position(&self, id: &StepId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn skip_policy(&self) -> &SkipPolicy {
        &self.skip
    }

    pub fn active_policy(&self) -> ActivePolicy {
        self.active_policy
    }

    /// Whether a new run may start after one completed.
    pub fn repeatable(&self) -> bool {
        self.repeatable
    }

    /// Replaces the "already active" policy, e.g. from configuration.
    pub fn with_active_policy(mut self, policy: ActivePolicy) -> Self {
        self.active_policy = policy;
        self
    }

    /// The step after `id` in table order, or `Finish` after the last.
    pub fn following(&self, id: &StepId) -> Target {
        match self.position(id) {
            Some(i) if i + 1 < self.steps.len() => Target::Step(self.steps[i + 1].id.clone()),
            _ => Target::Finish,
        }
    }

    /// Resolves a step's transition against its answer and the merged data.
    pub fn resolve(&self, from: &StepId, transition: &Transition, answer: &Value, data: &StepData) -> Target {
        match transition.decide(answer, data) {
            Transition::Goto(id) => Target::Step(id.clone()),
            Transition::Finish => Target::Finish,
            // decide() only returns plain transitions
            _ => self.following(from),
        }
    }

    /// Rough completion percentage for display.
    pub fn progress_percent(&self, step: &StepId, status: FlowStatus) -> u8 {
        if status == FlowStatus::Completed {
            return 100;
        }
        let position = self.position(step).unwrap_or(0);
        ((position * 100) / self.steps.len()) as u8
    }
}

pub struct FlowDefinitionBuilder {
    kind: FlowKind,
    steps: Vec<StepDefinition>,
    skip: SkipPolicy,
    active_policy: ActivePolicy,
    repeatable: bool,
}

impl FlowDefinitionBuilder {
    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn skip_policy(mut self, skip: SkipPolicy) -> Self {
        self.skip = skip;
        self
    }

    pub fn skip_to(self, landing: impl Into<String>) -> Self {
        self.skip_policy(SkipPolicy::EndFlow {
            landing: StepId::new(landing),
        })
    }

    pub fn on_active(mut self, policy: ActivePolicy) -> Self {
        self.active_policy = policy;
        self
    }

    pub fn repeatable(mut self, repeatable: bool) -> Self {
        self.repeatable = repeatable;
        self
    }

    /// Checks the table: non-empty, unique ids, and every transition target
    /// and skip landing names a defined step.
    pub fn build(self) -> Result<FlowDefinition, DefinitionError> {
        let kind = self.kind;
        if self.steps.is_empty() {
            return Err(DefinitionError::Empty(kind));
        }

        let mut index = HashMap::with_capacity(self.steps.len());
        for (i, step) in self.steps.iter().enumerate() {
            if index.insert(step.id.clone(), i).is_some() {
                return Err(DefinitionError::DuplicateStep {
                    kind,
                    step: step.id.clone(),
                });
            }
        }

        for step in &self.steps {
            if let Some(target) = step
                .transition
                .targets()
                .into_iter()
                .find(|t| !index.contains_key(*t))
            {
                return Err(DefinitionError::UnknownTarget {
                    kind,
                    from: step.id.clone(),
                    target: target.clone(),
                });
            }
        }

        if let SkipPolicy::EndFlow { landing } = &self.skip {
            if !index.contains_key(landing) {
                return Err(DefinitionError::UnknownSkipLanding {
                    kind,
                    step: landing.clone(),
                });
            }
        }

        Ok(FlowDefinition {
            kind,
            steps: self.steps,
            index,
            skip: self.skip,
            active_policy: self.active_policy,
            repeatable: self.repeatable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flow::InputRule;
    use serde_json::json;

    fn step(id: &str) -> StepDefinition {
        StepDefinition::new(id, format!("{id}?"), InputRule::Acknowledge)
    }

    fn three_steps() -> FlowDefinition {
        FlowDefinition::builder(FlowKind::CheckIn)
            .step(step("a"))
            .step(step("b"))
            .step(step("c"))
            .build()
            .unwrap()
    }

    mod building {
        use super::*;

        #[test]
        fn empty_table_is_rejected() {
            let err = FlowDefinition::builder(FlowKind::CheckIn).build().unwrap_err();
            assert_eq!(err, DefinitionError::Empty(FlowKind::CheckIn));
        }

        #[test]
        fn duplicate_ids_are_rejected() {
            let err = FlowDefinition::builder(FlowKind::CheckIn)
                .step(step("a"))
                .step(step("a"))
                .build()
                .unwrap_err();
            assert!(matches!(err, DefinitionError::DuplicateStep { .. }));
        }

        #[test]
        fn dangling_goto_is_rejected() {
            let err = FlowDefinition::builder(FlowKind::CheckIn)
                .step(step("a").then(Transition::goto("nowhere")))
                .build()
                .unwrap_err();
            assert_eq!(
                err,
                DefinitionError::UnknownTarget {
                    kind: FlowKind::CheckIn,
                    from: StepId::from("a"),
                    target: StepId::from("nowhere"),
                }
            );
        }

        #[test]
        fn unknown_skip_landing_is_rejected() {
            let err = FlowDefinition::builder(FlowKind::CheckIn)
                .step(step("a"))
                .skip_to("z")
                .build()
                .unwrap_err();
            assert!(matches!(err, DefinitionError::UnknownSkipLanding { .. }));
        }
    }

    mod resolving {
        use super::*;

        #[test]
        fn first_step_is_table_head() {
            assert_eq!(three_steps().first_step().id, StepId::from("a"));
        }

        #[test]
        fn next_walks_table_then_finishes() {
            let def = three_steps();
            let data = StepData::default();
            assert_eq!(
                def.resolve(&"a".into(), &Transition::Next, &Value::Null, &data),
                Target::Step("b".into())
            );
            assert_eq!(
                def.resolve(&"c".into(), &Transition::Next, &Value::Null, &data),
                Target::Finish
            );
        }

        #[test]
        fn conditional_next_uses_table_order() {
            let def = three_steps();
            let t = Transition::on_answer(json!(true), Transition::Next, Transition::goto("a"));
            assert_eq!(
                def.resolve(&"a".into(), &t, &json!(true), &StepData::default()),
                Target::Step("b".into())
            );
            assert_eq!(
                def.resolve(&"b".into(), &t, &json!(false), &StepData::default()),
                Target::Step("a".into())
            );
        }

        #[test]
        fn progress_tracks_position() {
            let def = three_steps();
            assert_eq!(def.progress_percent(&"a".into(), FlowStatus::InProgress), 0);
            assert_eq!(def.progress_percent(&"b".into(), FlowStatus::InProgress), 33);
            assert_eq!(def.progress_percent(&"c".into(), FlowStatus::Completed), 100);
        }

        #[test]
        fn policy_override_replaces_default() {
            let def = three_steps().with_active_policy(ActivePolicy::Resume);
            assert_eq!(def.active_policy(), ActivePolicy::Resume);
        }
    }
}
