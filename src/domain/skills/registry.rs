//! Skill Registry - catalog of named, deterministic operations.
//!
//! Skills are invoked by name with JSON arguments. Arguments are checked
//! against the skill's schema first; a handler never sees invalid input.
//!
//! # Example
//!
//! ```
//! use coach_core::domain::foundation::{Timestamp, UserId};
//! use coach_core::domain::skills::{PropertySchema, SkillContext, SkillRegistry, SkillSchema};
//! use serde_json::json;
//!
//! let mut registry = SkillRegistry::new();
//! registry
//!     .register(
//!         "shout",
//!         "Upper-cases a word",
//!         SkillSchema::object().required("word", PropertySchema::string()),
//!         |args, _ctx| Ok(json!(args["word"].as_str().unwrap_or_default().to_uppercase())),
//!     )
//!     .unwrap();
//!
//! let ctx = SkillContext::new(UserId::new("u1").unwrap(), Timestamp::now());
//! let invocation = registry.invoke("shout", json!({"word": "hi"}), &ctx).unwrap();
//! assert_eq!(invocation.output(), Some(&json!("HI")));
//! ```

use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::{SchemaValidationError, SkillContext, SkillFailure, SkillInvocation, SkillOutcome, SkillSchema};

/// Synchronous, pure handler over validated arguments.
pub type SkillHandler =
    Arc<dyn Fn(&Value, &SkillContext) -> Result<Value, SkillFailure> + Send + Sync>;

/// Contract errors. These indicate a programming or configuration bug, not
/// a user mistake.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkillError {
    #[error("skill not found: {name}")]
    NotFound { name: String },

    #[error("invalid arguments for skill {skill}: {source}")]
    InvalidArguments {
        skill: String,
        #[source]
        source: SchemaValidationError,
    },

    #[error("skill already registered: {name}")]
    AlreadyRegistered { name: String },
}

/// Public description of a registered skill.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl SkillDescriptor {
    /// Function-calling format understood by OpenAI-style APIs.
    pub fn to_openai_format(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }

    pub fn to_anthropic_format(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.parameters,
        })
    }
}

#[derive(Clone)]
struct RegisteredSkill {
    description: String,
    schema: SkillSchema,
    handler: SkillHandler,
}

/// Name-keyed skill catalog.
#[derive(Clone, Default)]
pub struct SkillRegistry {
    skills: HashMap<String, RegisteredSkill>,
}

impl fmt::Debug for SkillRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkillRegistry")
            .field("skills", &self.names())
            .finish()
    }
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a skill. Names are unique; re-registering is an error.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: SkillSchema,
        handler: F,
    ) -> Result<(), SkillError>
    where
        F: Fn(&Value, &SkillContext) -> Result<Value, SkillFailure> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.skills.contains_key(&name) {
            return Err(SkillError::AlreadyRegistered { name });
        }
        self.skills.insert(
            name,
            RegisteredSkill {
                description: description.into(),
                schema,
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// Removes a skill. Returns whether it was present.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.skills.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.skills.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.skills.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn descriptor(&self, name: &str) -> Option<SkillDescriptor> {
        self.skills.get(name).map(|skill| SkillDescriptor {
            name: name.to_string(),
            description: skill.description.clone(),
            parameters: skill.schema.to_json_schema(),
        })
    }

    /// Descriptors for every skill, sorted by name.
    pub fn descriptors(&self) -> Vec<SkillDescriptor> {
        self.names()
            .into_iter()
            .filter_map(|name| self.descriptor(name))
            .collect()
    }

    pub fn tool_definitions(&self) -> Vec<Value> {
        self.descriptors()
            .iter()
            .map(SkillDescriptor::to_openai_format)
            .collect()
    }

    /// Validates `args` and runs the handler.
    ///
    /// Contract violations come back as `Err`. A handler that refuses its
    /// input still yields `Ok`, with a failed outcome.
    pub fn invoke(
        &self,
        name: &str,
        args: Value,
        ctx: &SkillContext,
    ) -> Result<SkillInvocation, SkillError> {
        let skill = self.skills.get(name).ok_or_else(|| SkillError::NotFound {
            name: name.to_string(),
        })?;

        skill
            .schema
            .validate(&args)
            .map_err(|source| SkillError::InvalidArguments {
                skill: name.to_string(),
                source,
            })?;

        let outcome = match (skill.handler)(&args, ctx) {
            Ok(output) => {
                tracing::debug!(skill = name, user_id = %ctx.user_id, "skill succeeded");
                SkillOutcome::Succeeded { output }
            }
            Err(failure) => {
                tracing::warn!(skill = name, user_id = %ctx.user_id, reason = %failure, "skill failed");
                SkillOutcome::Failed {
                    reason: failure.to_string(),
                }
            }
        };

        Ok(SkillInvocation {
            skill: name.to_string(),
            args,
            outcome,
            invoked_at: ctx.now,
        })
    }
}
