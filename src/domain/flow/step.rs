//! Static step descriptions that make up a flow's table.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::{InputRule, StepData};

/// Identifier of a step within one flow kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Where a step goes once its input is accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The following step in table order; finishing after the last one.
    Next,
    Goto(StepId),
    /// Terminal: the flow completes.
    Finish,
    /// Conditional on accumulated data after this step's values are merged.
    Branch {
        field: String,
        equals: Value,
        then: Box<Transition>,
        otherwise: Box<Transition>,
    },
    /// Conditional on this step's own answer, stored or not.
    Answer {
        equals: Value,
        then: Box<Transition>,
        otherwise: Box<Transition>,
    },
}

impl Transition {
    pub fn goto(step: impl Into<String>) -> Self {
        Transition::Goto(StepId::new(step))
    }

    pub fn branch(field: impl Into<String>, equals: Value, then: Transition, otherwise: Transition) -> Self {
        Transition::Branch {
            field: field.into(),
            equals,
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn on_answer(equals: Value, then: Transition, otherwise: Transition) -> Self {
        Transition::Answer {
            equals,
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    /// Every explicit step this transition can land on.
    pub(crate) fn targets(&self) -> Vec<&StepId> {
        match self {
            Transition::Next | Transition::Finish => Vec::new(),
            Transition::Goto(id) => vec![id],
            Transition::Branch { then, otherwise, .. } | Transition::Answer { then, otherwise, .. } => {
                let mut targets = then.targets();
                targets.extend(otherwise.targets());
                targets
            }
        }
    }

    /// Collapses conditionals into a plain `Next`, `Goto`, or `Finish`.
    pub(crate) fn decide<'a>(&'a self, answer: &Value, data: &StepData) -> &'a Transition {
        match self {
            Transition::Branch { field, equals, then, otherwise } => {
                if data.get(field) == Some(equals) {
                    then.decide(answer, data)
                } else {
                    otherwise.decide(answer, data)
                }
            }
            Transition::Answer { equals, then, otherwise } => {
                if answer == equals {
                    then.decide(answer, data)
                } else {
                    otherwise.decide(answer, data)
                }
            }
            plain => plain,
        }
    }
}

/// Skill a step triggers once its input is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillBinding {
    pub skill: String,
    /// Data fields passed as arguments; `None` passes everything collected.
    pub fields: Option<Vec<String>>,
}

impl SkillBinding {
    pub fn new(skill: impl Into<String>) -> Self {
        Self {
            skill: skill.into(),
            fields: None,
        }
    }

    pub fn with_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Builds the argument object from collected data. Absent fields are
    /// left out so the skill schema decides whether they were required.
    pub fn arguments(&self, data: &StepData) -> Value {
        let mut args = Map::new();
        match &self.fields {
            Some(fields) => {
                for field in fields {
                    if let Some(value) = data.get(field) {
                        args.insert(field.clone(), value.clone());
                    }
                }
            }
            None => {
                for (field, value) in data.iter() {
                    args.insert(field.to_string(), value.clone());
                }
            }
        }
        Value::Object(args)
    }
}

/// One row of a flow's declarative step table.
#[derive(Debug, Clone)]
pub struct StepDefinition {
    pub id: StepId,
    /// Deterministic text shown when the step becomes current.
    pub prompt: String,
    pub rule: InputRule,
    pub transition: Transition,
    pub skill: Option<SkillBinding>,
    /// Cannot be skipped.
    pub mandatory: bool,
    /// Previously recorded values may be replaced when revisited.
    pub allows_correction: bool,
    /// The assistant's reply after this step is phrased by a provider.
    pub generative: bool,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>, rule: InputRule) -> Self {
        Self {
            id: StepId::new(id),
            prompt: prompt.into(),
            rule,
            transition: Transition::Next,
            skill: None,
            mandatory: false,
            allows_correction: false,
            generative: false,
        }
    }

    pub fn then(mut self, transition: Transition) -> Self {
        self.transition = transition;
        self
    }

    pub fn with_skill(mut self, binding: SkillBinding) -> Self {
        self.skill = Some(binding);
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn correctable(mut self) -> Self {
        self.allows_correction = true;
        self
    }

    pub fn generative(mut self) -> Self {
        self.generative = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::Timestamp;
    use serde_json::json;

    fn data_with(field: &str, value: Value) -> StepData {
        let mut data = StepData::default();
        data.record(field, value, &StepId::from("s"), false, Timestamp::now())
            .unwrap();
        data
    }

    #[test]
    fn branch_follows_accumulated_data() {
        let t = Transition::branch("plan", json!("weekly"), Transition::goto("w"), Transition::Finish);
        assert_eq!(t.decide(&Value::Null, &data_with("plan", json!("weekly"))), &Transition::goto("w"));
        assert_eq!(t.decide(&Value::Null, &data_with("plan", json!("none"))), &Transition::Finish);
    }

    #[test]
    fn answer_follows_this_steps_value() {
        let t = Transition::on_answer(json!(true), Transition::Finish, Transition::goto("goal"));
        let data = StepData::default();
        assert_eq!(t.decide(&json!(true), &data), &Transition::Finish);
        assert_eq!(t.decide(&json!(false), &data), &Transition::goto("goal"));
    }

    #[test]
    fn nested_targets_are_collected() {
        let t = Transition::on_answer(
            json!(1),
            Transition::goto("a"),
            Transition::branch("x", json!(2), Transition::goto("b"), Transition::Next),
        );
        let ids: Vec<_> = t.targets().into_iter().map(|s| s.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn binding_selects_listed_fields_only() {
        let mut data = data_with("name", json!("Ana"));
        data.record("secret", json!("x"), &StepId::from("s"), false, Timestamp::now())
            .unwrap();
        let binding = SkillBinding::new("greet").with_fields(["name", "missing"]);
        assert_eq!(binding.arguments(&data), json!({"name": "Ana"}));
        assert_eq!(
            SkillBinding::new("all").arguments(&data),
            json!({"name": "Ana", "secret": "x"})
        );
    }

    #[test]
    fn builder_defaults_are_permissive() {
        let step = StepDefinition::new("name", "Who are you?", InputRule::text("name", 1, 10));
        assert_eq!(step.transition, Transition::Next);
        assert!(!step.mandatory && !step.allows_correction && !step.generative);
        assert!(step.skill.is_none());
    }
}
