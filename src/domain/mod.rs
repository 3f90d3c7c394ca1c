//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors)
//! - `conversation` - Append-only transcripts and message payloads
//! - `flow` - Declarative step tables and flow instances
//! - `profile` - What onboarding taught us about the user
//! - `skills` - Schema-validated deterministic operations

pub mod conversation;
pub mod flow;
pub mod foundation;
pub mod profile;
pub mod skills;
