//! Provider Router - ordered failover with uniform retry policy.
//!
//! Adapters are tried in priority order. Each gets up to `max_attempts`
//! calls; only transient failures (`RateLimited`, `Timeout`, `Unavailable`)
//! are retried, with capped exponential backoff. `AuthInvalid` and
//! `InvalidResponse` move straight to the next adapter.
//!
//! When nothing succeeds the router returns a [`LocalFallback`] instead of
//! an error, so "no AI keys configured" is an ordinary, testable mode.
//!
//! ```text
//! primary ──retry──retry──▶ secondary ──retry──▶ ... ──▶ LocalFallback
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

use crate::ports::{CompletionOptions, Prompt, ProviderAdapter, ProviderError, ProviderResponse};

/// Retry and deadline constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Calls per adapter, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Bound on the whole route, across every adapter and backoff.
    pub deadline: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            deadline: Duration::from_secs(30),
        }
    }
}

impl RouterConfig {
    /// Delay before retry number `retry` (1-based), honoring a provider's
    /// `retry_after` hint but never exceeding `max_backoff`.
    pub fn backoff_for(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        let exponential = self.initial_backoff.saturating_mul(factor);
        exponential.max(hint.unwrap_or_default()).min(self.max_backoff)
    }
}

/// Why the router gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// No adapter is configured.
    NoProviders,
    /// Every adapter used its attempts.
    Exhausted { last_error: ProviderError },
    /// The router deadline ran out first.
    DeadlineExceeded,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoProviders => "no_providers",
            Self::Exhausted { .. } => "exhausted",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

/// Deterministic reply used when no provider answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFallback {
    pub content: String,
    pub reason: FallbackReason,
    /// Upstream calls made before giving up.
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Generated(ProviderResponse),
    Fallback(LocalFallback),
}

impl RouteOutcome {
    pub fn content(&self) -> &str {
        match self {
            Self::Generated(response) => &response.content,
            Self::Fallback(fallback) => &fallback.content,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

/// Hook for attempt failures, failovers and fallbacks.
pub trait RouterObserver: Send + Sync {
    fn on_attempt_failed(&self, _provider: &str, _attempt: u32, _error: &ProviderError) {}
    fn on_failover(&self, _from: &str, _to: &str, _error: &ProviderError) {}
    fn on_fallback(&self, _fallback: &LocalFallback) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpRouterObserver;

impl RouterObserver for NoOpRouterObserver {}

pub const DEFAULT_FALLBACK_TEXT: &str =
    "I can't reach my AI assistant right now, so I'm keeping things simple. Your message was saved.";

/// Selects adapters in priority order and falls back locally.
pub struct ProviderRouter {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    config: RouterConfig,
    observer: Arc<dyn RouterObserver>,
    fallback_text: String,
}

impl ProviderRouter {
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>, config: RouterConfig) -> Self {
        Self {
            adapters,
            config,
            observer: Arc::new(NoOpRouterObserver),
            fallback_text: DEFAULT_FALLBACK_TEXT.to_string(),
        }
    }

    /// A router with no adapters: every route is a local fallback.
    pub fn local_only() -> Self {
        Self::new(Vec::new(), RouterConfig::default())
    }

    pub fn with_observer(mut self, observer: Arc<dyn RouterObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_fallback_text(mut self, text: impl Into<String>) -> Self {
        self.fallback_text = text.into();
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Adapter names in priority order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    pub fn is_local_only(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Routes one completion. Never fails: the worst case is a fallback.
    ///
    /// Dropping the returned future cancels the in-flight call.
    pub async fn route(&self, prompt: &Prompt, options: &CompletionOptions) -> RouteOutcome {
        let deadline = Instant::now() + self.config.deadline;
        let mut attempts = 0u32;
        let mut last_error: Option<ProviderError> = None;

        for (index, adapter) in self.adapters.iter().enumerate() {
            let provider = adapter.name();

            for attempt in 1..=self.config.max_attempts.max(1) {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return self.fallback(FallbackReason::DeadlineExceeded, attempts);
                }

                let budget = options.timeout.min(remaining);
                let attempt_options = options.clone().with_timeout(budget);
                attempts += 1;

                let result = match timeout(budget, adapter.complete(prompt, &attempt_options)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(budget)),
                };

                let error = match result {
                    Ok(response) => {
                        tracing::debug!(provider, attempt, "provider answered");
                        return RouteOutcome::Generated(response);
                    }
                    Err(error) => error,
                };

                tracing::warn!(provider, attempt, kind = error.kind(), error = %error, "provider attempt failed");
                self.observer.on_attempt_failed(provider, attempt, &error);

                let retry = error.is_retryable() && attempt < self.config.max_attempts;
                let hint = match &error {
                    ProviderError::RateLimited { retry_after } => *retry_after,
                    _ => None,
                };
                last_error = Some(error);
                if !retry {
                    break;
                }

                // A wait past the route deadline is skipped; the next adapter
                // gets the remaining budget.
                let delay = self.config.backoff_for(attempt, hint);
                if delay >= deadline.saturating_duration_since(Instant::now()) {
                    tracing::debug!(provider, attempt, ?delay, "backoff exceeds route deadline, moving on");
                    break;
                }
                sleep(delay).await;
            }

            if deadline.saturating_duration_since(Instant::now()).is_zero() {
                return self.fallback(FallbackReason::DeadlineExceeded, attempts);
            }

            if let (Some(next), Some(error)) = (self.adapters.get(index + 1), last_error.as_ref()) {
                tracing::info!(from = provider, to = next.name(), kind = error.kind(), "failing over");
                self.observer.on_failover(provider, next.name(), error);
            }
        }

        let reason = match last_error {
            Some(last_error) => FallbackReason::Exhausted { last_error },
            None => FallbackReason::NoProviders,
        };
        self.fallback(reason, attempts)
    }

    fn fallback(&self, reason: FallbackReason, attempts: u32) -> RouteOutcome {
        let fallback = LocalFallback {
            content: self.fallback_text.clone(),
            reason,
            attempts,
        };
        tracing::warn!(reason = fallback.reason.as_str(), attempts, "all providers failed, using local fallback");
        self.observer.on_fallback(&fallback);
        RouteOutcome::Fallback(fallback)
    }
}
