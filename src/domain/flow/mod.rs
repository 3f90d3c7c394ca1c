//! Flow domain - generic step-sequenced conversations.
//!
//! A flow kind is a declarative table of [`StepDefinition`]s. A
//! [`FlowInstance`] walks that table one validated submission at a time.
//! Onboarding, weekly planning and check-ins are all instances of the same
//! machinery; adding a kind means adding a table, not control flow.
//!
//! Everything here is pure. Persistence and optimistic concurrency live in
//! `application::FlowEngine`.

pub mod builtin;
mod catalog;
mod definition;
mod errors;
mod input;
mod instance;
mod kind;
mod status;
mod step;

pub use catalog::FlowCatalog;
pub use definition::{ActivePolicy, FlowDefinition, FlowDefinitionBuilder, SkipPolicy, Target};
pub use errors::{DefinitionError, FlowError};
pub use input::{normalize_timezone, parse_timezone, split_items, Accepted, InputRule, RawInput, StepValidator};
pub use instance::{
    DataEntry, FlowInstance, FlowView, PendingSkill, StepData, StepTransition, Submission,
};
pub use kind::FlowKind;
pub use status::FlowStatus;
pub use step::{SkillBinding, StepDefinition, StepId, Transition};
