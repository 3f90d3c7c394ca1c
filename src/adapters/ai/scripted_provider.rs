//! Scripted Provider for testing.
//!
//! Plays back a queue of canned results, then a fallback behavior, while
//! recording every prompt it receives. Lets tests drive the router and
//! orchestrator through exact failure sequences without network access.
//!
//! # Example
//!
//! ```ignore
//! let provider = ScriptedProvider::new("primary")
//!     .then_fail(ProviderError::rate_limited())
//!     .then_reply("Hello!");
//!
//! assert!(provider.complete(&prompt, &options).await.is_err());
//! assert_eq!(provider.complete(&prompt, &options).await?.content, "Hello!");
//! assert_eq!(provider.call_count(), 2);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::sleep;

use crate::ports::{
    CompletionOptions, Prompt, ProviderAdapter, ProviderError, ProviderResponse, TokenUsage,
};

/// What to do once the script runs out.
#[derive(Debug, Clone)]
enum Exhausted {
    Reply(String),
    Fail(ProviderError),
}

/// Deterministic adapter whose results are configured up front.
#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    name: String,
    script: Arc<Mutex<VecDeque<Result<String, ProviderError>>>>,
    exhausted: Exhausted,
    delay: Duration,
    prompts: Arc<Mutex<Vec<Prompt>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedProvider {
    /// A provider that replies "Scripted response" once its script is empty.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            exhausted: Exhausted::Reply("Scripted response".to_string()),
            delay: Duration::ZERO,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A provider that fails every call with `error`.
    pub fn failing(name: impl Into<String>, error: ProviderError) -> Self {
        Self {
            exhausted: Exhausted::Fail(error),
            ..Self::new(name)
        }
    }

    pub fn then_reply(self, content: impl Into<String>) -> Self {
        locked(&self.script).push_back(Ok(content.into()));
        self
    }

    pub fn then_fail(self, error: ProviderError) -> Self {
        locked(&self.script).push_back(Err(error));
        self
    }

    /// Reply used after the script is consumed.
    pub fn otherwise_reply(mut self, content: impl Into<String>) -> Self {
        self.exhausted = Exhausted::Reply(content.into());
        self
    }

    /// Simulated latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        locked(&self.prompts).len()
    }

    /// Every prompt received, oldest first.
    pub fn prompts(&self) -> Vec<Prompt> {
        locked(&self.prompts).clone()
    }

    fn next_result(&self) -> Result<String, ProviderError> {
        locked(&self.script)
            .pop_front()
            .unwrap_or_else(|| match &self.exhausted {
                Exhausted::Reply(content) => Ok(content.clone()),
                Exhausted::Fail(error) => Err(error.clone()),
            })
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        prompt: &Prompt,
        _options: &CompletionOptions,
    ) -> Result<ProviderResponse, ProviderError> {
        locked(&self.prompts).push(prompt.clone());

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let content = self.next_result()?;
        let completion_tokens = (content.len() / 4).max(1) as u32;
        Ok(ProviderResponse::new(self.name.clone(), "scripted-1", content)
            .with_usage(TokenUsage::new(10, completion_tokens, 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::conversation::Role;

    fn prompt() -> Prompt {
        Prompt::new().with_message(Role::User, "Hello")
    }

    #[tokio::test]
    async fn plays_script_in_order_then_default() {
        let provider = ScriptedProvider::new("p")
            .then_fail(ProviderError::rate_limited())
            .then_reply("Second");
        let options = CompletionOptions::default();

        let first = provider.complete(&prompt(), &options).await;
        let second = provider.complete(&prompt(), &options).await.unwrap();
        let third = provider.complete(&prompt(), &options).await.unwrap();

        assert_eq!(first.unwrap_err(), ProviderError::rate_limited());
        assert_eq!(second.content, "Second");
        assert_eq!(second.provider, "p");
        assert_eq!(third.content, "Scripted response");
    }

    #[tokio::test]
    async fn failing_provider_never_succeeds() {
        let provider = ScriptedProvider::failing("down", ProviderError::unavailable("503"));
        for _ in 0..3 {
            assert!(provider
                .complete(&prompt(), &CompletionOptions::default())
                .await
                .is_err());
        }
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn clones_share_history() {
        let provider = ScriptedProvider::new("p");
        let handle = provider.clone();

        provider
            .complete(&prompt(), &CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(handle.call_count(), 1);
        assert_eq!(handle.prompts()[0].last_user_content(), Some("Hello"));
    }

    #[tokio::test]
    async fn respects_delay() {
        let provider = ScriptedProvider::new("slow").with_delay(Duration::from_millis(30));
        let start = std::time::Instant::now();
        provider
            .complete(&prompt(), &CompletionOptions::default())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
