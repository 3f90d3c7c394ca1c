//! Application layer - routing, flow persistence and turn orchestration.
//!
//! Coordinates the pure domain with the ports. Everything that leaves this
//! layer is either a [`TurnOutcome`] or a [`CoreError`].

mod errors;
mod flow_engine;
mod intent;
mod orchestrator;
mod prompt;
mod provider_router;

pub use errors::{CoreError, TurnNotice};
pub use flow_engine::{FlowEngine, StartOutcome, DEFAULT_MAX_IDLE_DAYS};
pub use intent::{IntentMatch, IntentRule, IntentRules};
pub use orchestrator::{Orchestrator, TurnOutcome};
pub use prompt::{FlowContext, PromptBuilder, TurnContext, DEFAULT_HISTORY_WINDOW, DEFAULT_PREAMBLE};
pub use provider_router::{
    FallbackReason, LocalFallback, NoOpRouterObserver, ProviderRouter, RouteOutcome, RouterConfig,
    RouterObserver, DEFAULT_FALLBACK_TEXT,
};
