//! Skills domain - deterministic, schema-validated operations.
//!
//! Skills are the auditable counterpart to free-form generation: the
//! orchestrator invokes them by name, they validate their arguments, and
//! they return structured JSON.

pub mod builtin;
mod invocation;
mod registry;
mod schema;

pub use invocation::{SkillContext, SkillFailure, SkillInvocation, SkillOutcome};
pub use registry::{SkillDescriptor, SkillError, SkillHandler, SkillRegistry};
pub use schema::{PropertySchema, SchemaValidationError, SkillSchema, ValueType};
