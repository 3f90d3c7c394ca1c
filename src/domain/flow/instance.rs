//! Flow instance aggregate and its pure transition functions.
//!
//! Every operation here takes `&self` and returns a new instance; the caller
//! decides whether to persist it. A rejected submission therefore cannot
//! leave anything half-changed.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{FlowDefinition, FlowError, FlowKind, FlowStatus, RawInput, SkipPolicy, StepId, Target};
use crate::domain::foundation::{FlowInstanceId, StateMachine, Timestamp, UserId, ValidationError};

/// One validated value and where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEntry {
    pub field: String,
    pub value: Value,
    pub step: StepId,
    pub recorded_at: Timestamp,
}

/// Step-local accumulated data, kept in submission order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepData {
    entries: Vec<DataEntry>,
}

impl StepData {
    pub fn from_entries(entries: Vec<DataEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.entries.iter().find(|e| e.field == field).map(|e| &e.value)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DataEntry] {
        &self.entries
    }

    /// Field/value pairs in submission order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|e| (e.field.as_str(), &e.value))
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.field.as_str()).collect()
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Value::Object(map)
    }

    /// Records a value. Data only grows: an existing field may be replaced
    /// in place only when `allows_correction` is set. Re-recording the same
    /// value is a no-op.
    pub fn record(
        &mut self,
        field: &str,
        value: Value,
        step: &StepId,
        allows_correction: bool,
        now: Timestamp,
    ) -> Result<(), ValidationError> {
        match self.entries.iter_mut().find(|e| e.field == field) {
            Some(existing) if existing.value == value => Ok(()),
            Some(existing) if allows_correction => {
                existing.value = value;
                existing.step = step.clone();
                existing.recorded_at = now;
                Ok(())
            }
            Some(_) => Err(ValidationError::already_recorded(field)),
            None => {
                self.entries.push(DataEntry {
                    field: field.to_string(),
                    value,
                    step: step.clone(),
                    recorded_at: now,
                });
                Ok(())
            }
        }
    }
}

/// A skill the orchestrator still owes the instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSkill {
    pub skill: String,
    pub step: StepId,
    pub args: Value,
}

/// Result of a submission against the current step.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Advanced {
        instance: FlowInstance,
        transition: StepTransition,
    },
    /// Input failed validation. Nothing changed.
    Rejected { errors: Vec<ValidationError> },
}

/// What happened when a step's input was accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct StepTransition {
    pub from: StepId,
    pub to: StepId,
    pub completed: bool,
    pub skill: Option<PendingSkill>,
    pub generative: bool,
}

/// One run of a flow for one user.
///
/// # Invariants
///
/// - `current_step` names a step of the definition for `kind`
/// - `version` increases by one on every persisted change
/// - once terminal, no operation changes `status`, `current_step` or `data`
#[derive(Debug, Clone, PartialEq)]
pub struct FlowInstance {
    id: FlowInstanceId,
    user_id: UserId,
    kind: FlowKind,
    current_step: StepId,
    data: StepData,
    status: FlowStatus,
    version: u64,
    pending_skill: Option<PendingSkill>,
    started_at: Timestamp,
    updated_at: Timestamp,
    finished_at: Option<Timestamp>,
}

impl FlowInstance {
    /// A fresh instance at the definition's first step, version 1.
    pub fn begin(definition: &FlowDefinition, user_id: UserId, now: Timestamp) -> Self {
        Self {
            id: FlowInstanceId::new(),
            user_id,
            kind: definition.kind(),
            current_step: definition.first_step().id.clone(),
            data: StepData::default(),
            status: FlowStatus::InProgress,
            version: 1,
            pending_skill: None,
            started_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn reconstitute(
        id: FlowInstanceId,
        user_id: UserId,
        kind: FlowKind,
        current_step: StepId,
        data: StepData,
        status: FlowStatus,
        version: u64,
        pending_skill: Option<PendingSkill>,
        started_at: Timestamp,
        updated_at: Timestamp,
        finished_at: Option<Timestamp>,
    ) -> Self {
        Self {
            id,
            user_id,
            kind,
            current_step,
            data,
            status,
            version,
            pending_skill,
            started_at,
            updated_at,
            finished_at,
        }
    }

    pub fn id(&self) -> FlowInstanceId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    pub fn current_step(&self) -> &StepId {
        &self.current_step
    }

    pub fn data(&self) -> &StepData {
        &self.data
    }

    pub fn status(&self) -> FlowStatus {
        self.status
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn pending_skill(&self) -> Option<&PendingSkill> {
        self.pending_skill.as_ref()
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    pub fn finished_at(&self) -> Option<Timestamp> {
        self.finished_at
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Active, or finished with a skill still owed.
    pub fn needs_attention(&self) -> bool {
        self.is_active() || self.pending_skill.is_some()
    }

    /// In progress but untouched for longer than `max_idle`.
    pub fn is_stale(&self, now: Timestamp, max_idle: Duration) -> bool {
        self.is_active() && now.duration_since(&self.updated_at) > max_idle
    }

    /// Validates `input` against the current step and computes the next
    /// state. Rejections carry the errors and leave `self` untouched.
    pub fn submit(
        &self,
        definition: &FlowDefinition,
        input: &RawInput,
        now: Timestamp,
    ) -> Result<Submission, FlowError> {
        self.ensure_accepts_input()?;
        let step = self.step_definition(definition)?;

        let accepted = match step.rule.validate(input, &self.data) {
            Ok(accepted) => accepted,
            Err(errors) => return Ok(Submission::Rejected { errors }),
        };

        let mut next = self.clone();
        let mut errors = Vec::new();
        for (field, value) in accepted.record {
            if let Err(e) = next
                .data
                .record(&field, value, &step.id, step.allows_correction, now)
            {
                errors.push(e);
            }
        }
        if !errors.is_empty() {
            return Ok(Submission::Rejected { errors });
        }

        let target = definition.resolve(&step.id, &step.transition, &accepted.answer, &next.data);
        let completed = match target {
            Target::Step(id) => {
                next.current_step = id;
                false
            }
            Target::Finish => {
                next.finish(FlowStatus::Completed, now)?;
                true
            }
        };

        let skill = step.skill.as_ref().map(|binding| PendingSkill {
            skill: binding.skill.clone(),
            step: step.id.clone(),
            args: binding.arguments(&next.data),
        });
        next.pending_skill = skill.clone();
        next.touch(now);

        let transition = StepTransition {
            from: step.id.clone(),
            to: next.current_step.clone(),
            completed,
            skill,
            generative: step.generative,
        };
        Ok(Submission::Advanced {
            instance: next,
            transition,
        })
    }

    /// Applies the definition's skip policy to the current step.
    pub fn skip(&self, definition: &FlowDefinition, now: Timestamp) -> Result<FlowInstance, FlowError> {
        if !self.is_active() {
            return Err(FlowError::NotInProgress { status: self.status });
        }
        let step = self.step_definition(definition)?;
        if step.mandatory {
            return Err(FlowError::StepMandatory {
                kind: self.kind,
                step: step.id.clone(),
            });
        }

        let mut next = self.clone();
        match definition.skip_policy() {
            SkipPolicy::EndFlow { landing } => {
                next.current_step = landing.clone();
                next.pending_skill = None;
                next.finish(FlowStatus::Skipped, now)?;
            }
            SkipPolicy::NextStep => match definition.following(&step.id) {
                Target::Step(id) => next.current_step = id,
                Target::Finish => next.finish(FlowStatus::Completed, now)?,
            },
        }
        next.touch(now);
        Ok(next)
    }

    /// Marks an idle instance abandoned. Called by an external scheduler.
    pub fn abandon(&self, now: Timestamp) -> Result<FlowInstance, FlowError> {
        if !self.is_active() {
            return Err(FlowError::NotInProgress { status: self.status });
        }
        let mut next = self.clone();
        next.pending_skill = None;
        next.finish(FlowStatus::Abandoned, now)?;
        next.touch(now);
        Ok(next)
    }

    /// Clears the owed skill after it ran successfully.
    pub fn resolve_pending_skill(&self, now: Timestamp) -> Option<FlowInstance> {
        self.pending_skill.as_ref()?;
        let mut next = self.clone();
        next.pending_skill = None;
        next.touch(now);
        Some(next)
    }

    fn ensure_accepts_input(&self) -> Result<(), FlowError> {
        if let Some(pending) = &self.pending_skill {
            return Err(FlowError::SkillPending {
                skill: pending.skill.clone(),
            });
        }
        if !self.is_active() {
            return Err(FlowError::NotInProgress { status: self.status });
        }
        Ok(())
    }

    fn step_definition<'d>(
        &self,
        definition: &'d FlowDefinition,
    ) -> Result<&'d super::StepDefinition, FlowError> {
        if definition.kind() != self.kind {
            return Err(FlowError::UnknownKind(self.kind));
        }
        definition
            .step(&self.current_step)
            .ok_or_else(|| FlowError::UnknownStep {
                kind: self.kind,
                step: self.current_step.clone(),
            })
    }

    fn finish(&mut self, status: FlowStatus, now: Timestamp) -> Result<(), FlowError> {
        self.status = self
            .status
            .transition_to(status)
            .map_err(|_| FlowError::NotInProgress { status: self.status })?;
        self.finished_at = Some(now);
        Ok(())
    }

    fn touch(&mut self, now: Timestamp) {
        self.version += 1;
        self.updated_at = now;
    }
}

/// Read model returned to callers alongside assistant messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowView {
    pub id: FlowInstanceId,
    pub kind: FlowKind,
    pub status: FlowStatus,
    pub current_step: StepId,
    /// Prompt for the current step while the flow is in progress.
    pub prompt: Option<String>,
    pub progress_percent: u8,
    pub data: Value,
    pub version: u64,
    pub pending_skill: Option<String>,
    pub started_at: Timestamp,
    pub updated_at: Timestamp,
}

impl FlowView {
    pub fn of(instance: &FlowInstance, definition: &FlowDefinition) -> Self {
        let prompt = instance
            .is_active()
            .then(|| definition.step(&instance.current_step).map(|s| s.prompt.clone()))
            .flatten();
        Self {
            id: instance.id,
            kind: instance.kind,
            status: instance.status,
            current_step: instance.current_step.clone(),
            prompt,
            progress_percent: definition.progress_percent(&instance.current_step, instance.status),
            data: instance.data.to_json(),
            version: instance.version,
            pending_skill: instance.pending_skill.as_ref().map(|p| p.skill.clone()),
            started_at: instance.started_at,
            updated_at: instance.updated_at,
        }
    }
}
