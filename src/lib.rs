//! Coach Core - conversational coaching with structured flows.
//!
//! Routes chat turns through prioritized LLM providers with a local
//! fallback, runs deterministic skills, and walks users through
//! step-sequenced flows (onboarding, weekly planning, check-ins) whose state
//! survives restarts and concurrent turns.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
