//! Prompt assembly for provider calls.
//!
//! A prompt is the coach preamble, the user's profile and flow context as
//! the system text,
//! followed by a window of recent conversation messages and the current
//! user input. Older messages are dropped first when the token estimate
//! exceeds the budget.

use serde_json::Value;

use crate::domain::conversation::{Message, Role};
use crate::domain::flow::{FlowDefinition, FlowInstance, FlowStatus};
use crate::domain::profile::UserProfile;
use crate::domain::skills::SkillInvocation;
use crate::ports::Prompt;

pub const DEFAULT_PREAMBLE: &str = "You are a warm, concise productivity coach. \
Keep replies short and practical. Never invent facts about the user; use only \
what they told you and the tool results you are given.";

pub const DEFAULT_HISTORY_WINDOW: usize = 12;

/// Rough token estimate: about four characters per token plus a role marker.
fn estimate_tokens(text: &str) -> usize {
    text.len() / 4 + 4
}

/// Flow state the provider should know about.
#[derive(Debug, Clone, Copy)]
pub struct FlowContext<'a> {
    pub definition: &'a FlowDefinition,
    pub instance: &'a FlowInstance,
}

/// Everything that goes into one provider prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnContext<'a> {
    /// Transcript before this turn, oldest first.
    pub history: &'a [Message],
    pub user_text: &'a str,
    pub profile: Option<&'a UserProfile>,
    pub flow: Option<FlowContext<'a>>,
    pub skill: Option<&'a SkillInvocation>,
    /// What the reply must accomplish, e.g. "ask the next question".
    pub instruction: Option<&'a str>,
}

/// Builds provider prompts from conversation and flow state.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    preamble: String,
    history_window: usize,
    max_context_tokens: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            preamble: DEFAULT_PREAMBLE.to_string(),
            history_window: DEFAULT_HISTORY_WINDOW,
            max_context_tokens: 12_000,
        }
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = preamble.into();
        self
    }

    pub fn with_history_window(mut self, messages: usize) -> Self {
        self.history_window = messages;
        self
    }

    pub fn with_max_context_tokens(mut self, tokens: usize) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    pub fn history_window(&self) -> usize {
        self.history_window
    }

    pub fn build(&self, turn: TurnContext<'_>) -> Prompt {
        let system = self.system_text(&turn);
        let mut budget = self
            .max_context_tokens
            .saturating_sub(estimate_tokens(&system))
            .saturating_sub(estimate_tokens(turn.user_text));

        // Walk back from the newest message until the window or budget runs out.
        let start = turn.history.len().saturating_sub(self.history_window);
        let mut kept: Vec<&Message> = Vec::new();
        for message in turn.history[start..].iter().rev() {
            if message.role() == Role::System {
                continue;
            }
            let cost = estimate_tokens(message.content());
            if cost > budget {
                break;
            }
            budget -= cost;
            kept.push(message);
        }

        let mut prompt = Prompt::new().with_system(system);
        for message in kept.into_iter().rev() {
            prompt = prompt.with_message(message.role(), message.content());
        }
        prompt.with_message(Role::User, turn.user_text)
    }

    fn system_text(&self, turn: &TurnContext<'_>) -> String {
        let mut sections = vec![self.preamble.clone()];

        if let Some(about) = turn.profile.and_then(UserProfile::describe) {
            sections.push(about);
        }

        if let Some(flow) = turn.flow {
            sections.push(describe_flow(flow));
        }

        if let Some(invocation) = turn.skill {
            let result = invocation
                .output()
                .map(pretty)
                .unwrap_or_else(|| "(no output)".to_string());
            sections.push(format!(
                "Tool `{}` returned:\n{}\nBase your reply on this result.",
                invocation.skill, result
            ));
        }

        if let Some(instruction) = turn.instruction {
            sections.push(format!("Your reply must: {instruction}"));
        }

        sections.join("\n\n")
    }
}

fn describe_flow(flow: FlowContext<'_>) -> String {
    let instance = flow.instance;
    let collected = instance.data().field_names();
    let collected = if collected.is_empty() {
        "nothing yet".to_string()
    } else {
        collected.join(", ")
    };

    let mut text = format!(
        "The user is in the {} flow ({}% done). Collected so far: {}.",
        instance.kind(),
        flow.definition
            .progress_percent(instance.current_step(), instance.status()),
        collected
    );
    match instance.status() {
        FlowStatus::InProgress => {
            if let Some(step) = flow.definition.step(instance.current_step()) {
                text.push_str(&format!(
                    " Current step `{}` asks: \"{}\"",
                    step.id, step.prompt
                ));
            }
        }
        status => text.push_str(&format!(" The flow is {}.", status.as_str())),
    }
    text
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
