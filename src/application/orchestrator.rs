//! Orchestrator: one user turn from input to persisted assistant reply.
//!
//! A turn either drives the user's active flow (validate, transition, run the
//! step's skill, phrase the reply) or is free chat (optional intent skill,
//! then a provider). Provider trouble never fails a turn: the router's local
//! fallback is used and a [`TurnNotice::Degraded`] is attached.
//!
//! Once onboarding is complete its answers form a [`UserProfile`] that is
//! handed to skills, intent arguments and provider prompts.

use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::errors::{CoreError, TurnNotice};
use super::flow_engine::FlowEngine;
use super::intent::IntentRules;
use super::prompt::{FlowContext, PromptBuilder, TurnContext};
use super::provider_router::{ProviderRouter, RouteOutcome};
use crate::domain::conversation::{Conversation, ConversationState, Message, MessagePayload};
use crate::domain::flow::{
    FlowDefinition, FlowError, FlowInstance, FlowKind, FlowStatus, FlowView, PendingSkill, RawInput,
    Submission,
};
use crate::domain::foundation::{ConversationId, ErrorCode, Timestamp, UserId};
use crate::domain::profile::UserProfile;
use crate::domain::skills::{SkillContext, SkillInvocation, SkillRegistry};
use crate::ports::{CompletionOptions, ConversationRepository};

const SKILL_RETRY_HINT: &str = "Send any message and I'll try again.";
const APOLOGY_TEXT: &str = "Sorry, something went wrong on my side. Let's keep going.";

/// Everything a caller needs to render a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub conversation_id: ConversationId,
    /// Messages stored by this turn, in order.
    pub messages: Vec<Message>,
    pub flow: Option<FlowView>,
    pub notices: Vec<TurnNotice>,
}

impl TurnOutcome {
    /// The final assistant message.
    pub fn reply(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_assistant())
    }

    pub fn is_degraded(&self) -> bool {
        self.notices
            .iter()
            .any(|n| matches!(n, TurnNotice::Degraded { .. }))
    }
}

/// Who is speaking, where, and what they said.
struct TurnScope<'a> {
    user: &'a UserId,
    conversation: &'a Conversation,
    profile: Option<&'a UserProfile>,
    user_text: &'a str,
}

/// Messages and notices produced by a flow turn before they are stored.
struct Reply {
    messages: Vec<Message>,
    notices: Vec<TurnNotice>,
    instance: FlowInstance,
}

enum SkillRun {
    Succeeded {
        instance: FlowInstance,
        invocation: SkillInvocation,
    },
    /// The handler refused; the skill stays pending.
    Failed {
        instance: FlowInstance,
        invocation: SkillInvocation,
    },
    /// Contract bug; the pending skill was cleared so the flow can move on.
    Broken { instance: FlowInstance },
}

/// Coordinates flows, skills, providers and the transcript for each turn.
pub struct Orchestrator {
    flows: FlowEngine,
    conversations: Arc<dyn ConversationRepository>,
    router: Arc<ProviderRouter>,
    skills: Arc<SkillRegistry>,
    intents: IntentRules,
    prompts: PromptBuilder,
    options: CompletionOptions,
}

impl Orchestrator {
    pub fn new(
        flows: FlowEngine,
        conversations: Arc<dyn ConversationRepository>,
        router: Arc<ProviderRouter>,
        skills: Arc<SkillRegistry>,
    ) -> Self {
        Self {
            flows,
            conversations,
            router,
            skills,
            intents: IntentRules::builtin(),
            prompts: PromptBuilder::default(),
            options: CompletionOptions::default(),
        }
    }

    pub fn with_intents(mut self, intents: IntentRules) -> Self {
        self.intents = intents;
        self
    }

    pub fn with_prompts(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn flows(&self) -> &FlowEngine {
        &self.flows
    }

    /// Creates the conversation on first use. Fails for another user's or
    /// an archived conversation.
    pub async fn ensure_conversation(
        &self,
        user: &UserId,
        conversation_id: ConversationId,
    ) -> Result<Conversation, CoreError> {
        let conversation = self.conversations.ensure_exists(user, conversation_id).await?;
        if conversation.state() == ConversationState::Archived {
            return Err(CoreError::Forbidden(format!(
                "conversation {conversation_id} is archived"
            )));
        }
        Ok(conversation)
    }

    /// Handles one user turn.
    ///
    /// With `flow` set the turn goes to that kind's current instance.
    /// Otherwise the first flow needing attention gets it, and with none the
    /// turn is free chat.
    pub async fn handle_turn(
        &self,
        user: &UserId,
        conversation_id: ConversationId,
        input: RawInput,
        flow: Option<FlowKind>,
    ) -> Result<TurnOutcome, CoreError> {
        let conversation = self.ensure_conversation(user, conversation_id).await?;

        let target = match flow {
            Some(kind) => Some(self.attention_instance(user, kind).await?),
            None => self
                .flows
                .needing_attention(user)
                .await
                .map_err(CoreError::from_flow)?,
        };

        match target {
            Some(instance) => self.flow_turn(user, &conversation, instance, &input, true).await,
            None => self.free_chat(user, &conversation, &input.to_message_content()).await,
        }
    }

    /// Free chat, bypassing any active flow.
    pub async fn chat_turn(
        &self,
        user: &UserId,
        conversation_id: ConversationId,
        text: &str,
    ) -> Result<TurnOutcome, CoreError> {
        let conversation = self.ensure_conversation(user, conversation_id).await?;
        self.free_chat(user, &conversation, text).await
    }

    /// Starts (or, per policy, resumes) a flow and asks its current question.
    pub async fn start_flow(
        &self,
        user: &UserId,
        conversation_id: ConversationId,
        kind: FlowKind,
    ) -> Result<TurnOutcome, CoreError> {
        self.ensure_conversation(user, conversation_id).await?;

        let outcome = self
            .flows
            .start(user, kind, Timestamp::now())
            .await
            .map_err(CoreError::from_flow)?;
        let resumed = outcome.is_resumed();
        let instance = outcome.into_instance();
        let view = self.view(&instance)?;

        let prompt = view.prompt.clone().unwrap_or_default();
        let content = if resumed {
            format!("Welcome back! Let's pick up where we left off.\n\n{prompt}")
        } else {
            prompt
        };
        let message = Message::assistant(content).with_payload(flow_update(&instance));

        let messages = self
            .conversations
            .append_messages(conversation_id, vec![message])
            .await?;
        Ok(TurnOutcome {
            conversation_id,
            messages,
            flow: Some(view),
            notices: Vec::new(),
        })
    }

    /// Submits input to a specific flow kind.
    ///
    /// With `expected_version` the caller asserts which version it rendered;
    /// a mismatch is a `Conflict` and nothing is retried. Such a versioned
    /// submission that fails validation is a `CoreError::Validation` and
    /// leaves the transcript untouched.
    pub async fn submit_step(
        &self,
        user: &UserId,
        conversation_id: ConversationId,
        kind: FlowKind,
        input: RawInput,
        expected_version: Option<u64>,
    ) -> Result<TurnOutcome, CoreError> {
        let conversation = self.ensure_conversation(user, conversation_id).await?;
        let instance = self.attention_instance(user, kind).await?;

        if let Some(expected) = expected_version {
            if expected != instance.version() {
                return Err(CoreError::Conflict(format!(
                    "{kind} is at version {}, not {expected}",
                    instance.version()
                )));
            }
            if instance.pending_skill().is_none() {
                let definition = self.flows.definition(kind).map_err(CoreError::from_flow)?;
                let checked = instance
                    .submit(&definition, &input, Timestamp::now())
                    .map_err(CoreError::from_flow)?;
                if let Submission::Rejected { errors } = checked {
                    return Err(CoreError::Validation(errors));
                }
            }
        }

        self.flow_turn(user, &conversation, instance, &input, expected_version.is_none())
            .await
    }

    /// Latest instance of `kind`, in any status.
    pub async fn flow_status(
        &self,
        user: &UserId,
        kind: FlowKind,
    ) -> Result<Option<FlowView>, CoreError> {
        let latest = self.flows.latest(user, kind).await.map_err(CoreError::from_flow)?;
        latest.map(|instance| self.view(&instance)).transpose()
    }

    /// Skips the current step of `kind` per its skip policy.
    pub async fn skip_step(
        &self,
        user: &UserId,
        conversation_id: ConversationId,
        kind: FlowKind,
    ) -> Result<TurnOutcome, CoreError> {
        self.ensure_conversation(user, conversation_id).await?;
        let definition = self.flows.definition(kind).map_err(CoreError::from_flow)?;

        let instance = self
            .flows
            .skip(user, kind, Timestamp::now())
            .await
            .map_err(CoreError::from_flow)?;

        let content = match instance.status() {
            FlowStatus::InProgress => {
                format!("No problem, let's skip that.\n\n{}", step_prompt(&definition, &instance))
            }
            FlowStatus::Skipped => {
                format!("No problem. {}", step_prompt(&definition, &instance))
            }
            _ => completion_text(kind).to_string(),
        };
        let message = Message::assistant(content).with_payload(flow_update(&instance));
        let messages = self
            .conversations
            .append_messages(conversation_id, vec![message])
            .await?;

        Ok(TurnOutcome {
            conversation_id,
            messages,
            flow: Some(FlowView::of(&instance, &definition)),
            notices: Vec::new(),
        })
    }

    /// Archives a conversation. Archiving twice is fine.
    pub async fn archive_conversation(
        &self,
        user: &UserId,
        conversation_id: ConversationId,
    ) -> Result<Conversation, CoreError> {
        self.conversations.ensure_exists(user, conversation_id).await?;
        let archived = self.conversations.archive(conversation_id).await?;
        info!(conversation_id = %conversation_id, user_id = %user, "conversation archived");
        Ok(archived)
    }

    async fn attention_instance(
        &self,
        user: &UserId,
        kind: FlowKind,
    ) -> Result<FlowInstance, CoreError> {
        self.flows
            .latest(user, kind)
            .await
            .map_err(CoreError::from_flow)?
            .filter(FlowInstance::needs_attention)
            .ok_or(CoreError::FlowNotActive { kind })
    }

    fn view(&self, instance: &FlowInstance) -> Result<FlowView, CoreError> {
        self.flows.view(instance).map_err(CoreError::from_flow)
    }

    /// Profile from the user's completed onboarding. A failed lookup costs
    /// personalization only.
    async fn user_profile(&self, user: &UserId) -> Option<UserProfile> {
        match self.flows.latest(user, FlowKind::Onboarding).await {
            Ok(latest) => latest
                .filter(|instance| instance.status() == FlowStatus::Completed)
                .map(|instance| UserProfile::from_onboarding(instance.data()))
                .filter(|profile| !profile.is_empty()),
            Err(e) => {
                warn!(user_id = %user, error = %e, "user profile unavailable");
                None
            }
        }
    }

    // --- flow turns ---

    async fn flow_turn(
        &self,
        user: &UserId,
        conversation: &Conversation,
        instance: FlowInstance,
        input: &RawInput,
        retry_on_conflict: bool,
    ) -> Result<TurnOutcome, CoreError> {
        let kind = instance.kind();
        let definition = self.flows.definition(kind).map_err(CoreError::from_flow)?;
        let user_text = input.to_message_content();
        let profile = self.user_profile(user).await;
        let scope = TurnScope {
            user,
            conversation,
            profile: profile.as_ref(),
            user_text: &user_text,
        };

        let mut instance = instance;
        let mut retries_left = u8::from(retry_on_conflict);
        let reply = loop {
            let now = Timestamp::now();
            let attempt = if instance.pending_skill().is_some() {
                self.retry_pending_skill(&scope, &definition, instance.clone(), now)
                    .await
            } else {
                self.submit_input(&scope, &definition, &instance, input, now)
                    .await
            };

            match attempt {
                Ok(reply) => break reply,
                Err(FlowError::StaleVersion { expected, found }) if retries_left > 0 => {
                    retries_left -= 1;
                    warn!(
                        flow_kind = %kind,
                        instance = %instance.id(),
                        expected,
                        found,
                        "flow changed concurrently, retrying turn"
                    );
                    instance = self
                        .flows
                        .find(instance.id())
                        .await
                        .map_err(CoreError::from_flow)?
                        .filter(FlowInstance::needs_attention)
                        .ok_or(CoreError::FlowNotActive { kind })?;
                }
                Err(e) => return Err(CoreError::from_flow(e)),
            }
        };

        let mut batch = Vec::with_capacity(reply.messages.len() + 1);
        batch.push(Message::user(user_text.as_str()));
        batch.extend(reply.messages);
        let messages = self
            .conversations
            .append_messages(conversation.id(), batch)
            .await?;

        Ok(TurnOutcome {
            conversation_id: conversation.id(),
            messages,
            flow: Some(FlowView::of(&reply.instance, &definition)),
            notices: reply.notices,
        })
    }

    async fn submit_input(
        &self,
        scope: &TurnScope<'_>,
        definition: &FlowDefinition,
        instance: &FlowInstance,
        input: &RawInput,
        now: Timestamp,
    ) -> Result<Reply, FlowError> {
        match self.flows.submit(instance, input, now).await? {
            Submission::Rejected { errors } => {
                let detail = errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                let content = format!(
                    "That didn't work: {detail}.\n\n{}",
                    step_prompt(definition, instance)
                );
                let message = Message::assistant(content).with_payload(MessagePayload::ValidationErrors {
                    step: instance.current_step().to_string(),
                    errors: errors.clone(),
                });
                Ok(Reply {
                    messages: vec![message],
                    notices: vec![TurnNotice::ValidationError { errors }],
                    instance: instance.clone(),
                })
            }
            Submission::Advanced {
                instance: next,
                transition,
            } => {
                self.continue_flow(scope, definition, next, transition.skill, transition.generative, now)
                    .await
            }
        }
    }

    async fn retry_pending_skill(
        &self,
        scope: &TurnScope<'_>,
        definition: &FlowDefinition,
        instance: FlowInstance,
        now: Timestamp,
    ) -> Result<Reply, FlowError> {
        let pending = instance.pending_skill().cloned();
        let generative = pending
            .as_ref()
            .and_then(|p| definition.step(&p.step))
            .map(|step| step.generative)
            .unwrap_or(false);
        self.continue_flow(scope, definition, instance, pending, generative, now)
            .await
    }

    /// Runs an owed skill, then phrases the next question or the wrap-up.
    async fn continue_flow(
        &self,
        scope: &TurnScope<'_>,
        definition: &FlowDefinition,
        instance: FlowInstance,
        pending: Option<PendingSkill>,
        generative: bool,
        now: Timestamp,
    ) -> Result<Reply, FlowError> {
        let mut messages = Vec::new();
        let mut notices = Vec::new();
        let mut invocation = None;

        let instance = match pending {
            None => instance,
            Some(pending) => match self.run_skill(scope, instance, &pending, now).await? {
                SkillRun::Succeeded {
                    instance,
                    invocation: done,
                } => {
                    let summary = done.summary().unwrap_or("Done.").to_string();
                    messages.push(Message::assistant(summary).with_payload(MessagePayload::Skill {
                        invocation: done.clone(),
                    }));
                    invocation = Some(done);
                    instance
                }
                SkillRun::Failed {
                    instance,
                    invocation: failed,
                } => {
                    let reason = failed.failure_reason().unwrap_or("unknown error").to_string();
                    messages.push(
                        Message::assistant(format!("I couldn't finish that: {reason}. {SKILL_RETRY_HINT}"))
                            .with_payload(MessagePayload::Skill {
                                invocation: failed.clone(),
                            }),
                    );
                    notices.push(TurnNotice::SkillError {
                        skill: failed.skill,
                        reason,
                    });
                    return Ok(Reply {
                        messages,
                        notices,
                        instance,
                    });
                }
                SkillRun::Broken { instance } => {
                    messages.push(Message::assistant(APOLOGY_TEXT).with_payload(MessagePayload::Apology {
                        code: ErrorCode::InternalError,
                    }));
                    notices.push(TurnNotice::Internal {
                        code: ErrorCode::InternalError,
                    });
                    instance
                }
            },
        };

        let next_text = if instance.is_active() {
            step_prompt(definition, &instance)
        } else {
            completion_text(instance.kind()).to_string()
        };

        let reply = if generative {
            let instruction = if instance.is_active() {
                format!("acknowledge the user's answer in one sentence, then ask exactly this question: {next_text}")
            } else {
                "acknowledge the result briefly and congratulate the user on finishing".to_string()
            };
            let prompt = self.prompts.build(TurnContext {
                history: scope.conversation.messages(),
                user_text: scope.user_text,
                profile: scope.profile,
                flow: Some(FlowContext {
                    definition,
                    instance: &instance,
                }),
                skill: invocation.as_ref(),
                instruction: Some(instruction.as_str()),
            });
            match self.router.route(&prompt, &self.options).await {
                RouteOutcome::Generated(response) => {
                    Message::assistant(response.content).with_payload(flow_update(&instance))
                }
                RouteOutcome::Fallback(fallback) => {
                    let reason = fallback.reason.as_str().to_string();
                    notices.push(TurnNotice::Degraded {
                        reason: reason.clone(),
                    });
                    Message::assistant(next_text).with_payload(MessagePayload::Degraded { reason })
                }
            }
        } else {
            Message::assistant(next_text).with_payload(flow_update(&instance))
        };
        messages.push(reply);

        Ok(Reply {
            messages,
            notices,
            instance,
        })
    }

    async fn run_skill(
        &self,
        scope: &TurnScope<'_>,
        instance: FlowInstance,
        pending: &PendingSkill,
        now: Timestamp,
    ) -> Result<SkillRun, FlowError> {
        let ctx = SkillContext::new(scope.user.clone(), now)
            .in_flow(instance.kind())
            .with_profile(scope.profile.cloned());

        match self.skills.invoke(&pending.skill, pending.args.clone(), &ctx) {
            Ok(invocation) if invocation.is_success() => {
                let instance = self.settle_pending(instance, now).await?;
                Ok(SkillRun::Succeeded { instance, invocation })
            }
            Ok(invocation) => Ok(SkillRun::Failed { instance, invocation }),
            Err(contract) => {
                error!(
                    skill = %pending.skill,
                    flow_kind = %instance.kind(),
                    step = %pending.step,
                    error = %contract,
                    "skill contract violated"
                );
                let instance = self.settle_pending(instance, now).await?;
                Ok(SkillRun::Broken { instance })
            }
        }
    }

    /// Clears the pending skill. A concurrent writer only costs a warning:
    /// the skill ran, and re-running the turn would double-apply the input.
    async fn settle_pending(&self, instance: FlowInstance, now: Timestamp) -> Result<FlowInstance, FlowError> {
        match self.flows.resolve_pending_skill(&instance, now).await {
            Ok(resolved) => Ok(resolved),
            Err(FlowError::StaleVersion { expected, found }) => {
                warn!(
                    instance = %instance.id(),
                    expected,
                    found,
                    "pending skill resolved concurrently"
                );
                Ok(instance)
            }
            Err(e) => Err(e),
        }
    }

    // --- free chat ---

    async fn free_chat(
        &self,
        user: &UserId,
        conversation: &Conversation,
        text: &str,
    ) -> Result<TurnOutcome, CoreError> {
        let now = Timestamp::now();
        let mut notices = Vec::new();
        let profile = self.user_profile(user).await;
        let scope = TurnScope {
            user,
            conversation,
            profile: profile.as_ref(),
            user_text: text,
        };

        let reply = match self.intents.match_skill(text, scope.profile) {
            Some(intent) => {
                let ctx = SkillContext::new(user.clone(), now).with_profile(profile.clone());
                match self.skills.invoke(&intent.skill, intent.args, &ctx) {
                    Ok(invocation) if invocation.is_success() => {
                        self.phrase_skill_result(&scope, invocation, &mut notices).await
                    }
                    Ok(invocation) => {
                        let reason = invocation.failure_reason().unwrap_or("unknown error").to_string();
                        notices.push(TurnNotice::SkillError {
                            skill: invocation.skill.clone(),
                            reason: reason.clone(),
                        });
                        Message::assistant(format!("I couldn't look that up: {reason}."))
                            .with_payload(MessagePayload::Skill { invocation })
                    }
                    Err(contract) => {
                        error!(skill = %intent.skill, error = %contract, "skill contract violated");
                        notices.push(TurnNotice::Internal {
                            code: ErrorCode::InternalError,
                        });
                        Message::assistant(APOLOGY_TEXT).with_payload(MessagePayload::Apology {
                            code: ErrorCode::InternalError,
                        })
                    }
                }
            }
            None => {
                let prompt = self.prompts.build(TurnContext {
                    history: conversation.messages(),
                    user_text: text,
                    profile: scope.profile,
                    ..Default::default()
                });
                match self.router.route(&prompt, &self.options).await {
                    RouteOutcome::Generated(response) => Message::assistant(response.content),
                    RouteOutcome::Fallback(fallback) => {
                        let reason = fallback.reason.as_str().to_string();
                        notices.push(TurnNotice::Degraded {
                            reason: reason.clone(),
                        });
                        Message::assistant(fallback.content)
                            .with_payload(MessagePayload::Degraded { reason })
                    }
                }
            }
        };

        let messages = self
            .conversations
            .append_messages(conversation.id(), vec![Message::user(text), reply])
            .await?;
        info!(
            conversation_id = %conversation.id(),
            user_id = %user,
            degraded = notices.iter().any(|n| matches!(n, TurnNotice::Degraded { .. })),
            "chat turn handled"
        );

        Ok(TurnOutcome {
            conversation_id: conversation.id(),
            messages,
            flow: None,
            notices,
        })
    }

    async fn phrase_skill_result(
        &self,
        scope: &TurnScope<'_>,
        invocation: SkillInvocation,
        notices: &mut Vec<TurnNotice>,
    ) -> Message {
        let prompt = self.prompts.build(TurnContext {
            history: scope.conversation.messages(),
            user_text: scope.user_text,
            profile: scope.profile,
            skill: Some(&invocation),
            instruction: Some("answer the user's question using only the tool result"),
            ..Default::default()
        });

        match self.router.route(&prompt, &self.options).await {
            RouteOutcome::Generated(response) => {
                Message::assistant(response.content).with_payload(MessagePayload::Skill { invocation })
            }
            RouteOutcome::Fallback(fallback) => {
                let reason = fallback.reason.as_str().to_string();
                notices.push(TurnNotice::Degraded {
                    reason: reason.clone(),
                });
                let output = invocation.output().cloned().unwrap_or(Value::Null);
                let rendered = serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string());
                Message::assistant(format!("Here's what I found:\n{rendered}"))
                    .with_payload(MessagePayload::Degraded { reason })
            }
        }
    }
}

fn step_prompt(definition: &FlowDefinition, instance: &FlowInstance) -> String {
    definition
        .step(instance.current_step())
        .map(|step| step.prompt.clone())
        .unwrap_or_default()
}

fn completion_text(kind: FlowKind) -> &'static str {
    match kind {
        FlowKind::Onboarding => "Onboarding complete. Welcome aboard!",
        FlowKind::WeeklyPlan => "Your weekly plan is set. Have a focused week!",
        FlowKind::CheckIn => "Thanks for checking in!",
    }
}

fn flow_update(instance: &FlowInstance) -> MessagePayload {
    MessagePayload::FlowUpdate {
        kind: instance.kind(),
        step: instance.current_step().to_string(),
        status: instance.status(),
        version: instance.version(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ai::ScriptedProvider;
    use crate::adapters::storage::{InMemoryConversationRepository, InMemoryFlowRepository};
    use crate::application::RouterConfig;
    use crate::domain::flow::{FlowCatalog, InputRule, SkillBinding, StepDefinition, Transition};
    use crate::domain::skills::{PropertySchema, SkillFailure, SkillSchema};
    use crate::ports::ProviderAdapter;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Harness {
        orchestrator: Orchestrator,
        conversations: InMemoryConversationRepository,
        conversation: ConversationId,
    }

    fn ana() -> UserId {
        UserId::new("ana").unwrap()
    }

    fn build(router: ProviderRouter, catalog: FlowCatalog, skills: SkillRegistry) -> Harness {
        let conversations = InMemoryConversationRepository::new();
        let flows = FlowEngine::new(Arc::new(InMemoryFlowRepository::new()), Arc::new(catalog));
        let orchestrator = Orchestrator::new(
            flows,
            Arc::new(conversations.clone()),
            Arc::new(router),
            Arc::new(skills),
        );
        Harness {
            orchestrator,
            conversations,
            conversation: ConversationId::new(),
        }
    }

    fn with_router(router: ProviderRouter) -> Harness {
        build(
            router,
            FlowCatalog::builtin().unwrap(),
            SkillRegistry::with_builtin().unwrap(),
        )
    }

    fn scripted(provider: &ScriptedProvider) -> ProviderRouter {
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(provider.clone());
        ProviderRouter::new(vec![adapter], RouterConfig::default())
    }

    impl Harness {
        async fn say(&self, text: &str) -> TurnOutcome {
            self.orchestrator
                .handle_turn(&ana(), self.conversation, RawInput::from(text), None)
                .await
                .unwrap()
        }

        fn reply_text(outcome: &TurnOutcome) -> String {
            outcome.reply().unwrap().content().to_string()
        }
    }

    mod onboarding {
        use super::*;

        #[tokio::test]
        async fn full_walk_completes_and_cannot_restart() {
            // Given a provider that phrases one generative reply
            let provider = ScriptedProvider::new("scripted").then_reply("Great, you're set up!");
            let h = with_router(scripted(&provider));

            // When the user walks onboarding
            let start = h
                .orchestrator
                .start_flow(&ana(), h.conversation, FlowKind::Onboarding)
                .await
                .unwrap();
            assert!(Harness::reply_text(&start).starts_with("Welcome!"));

            let named = h.say("hi").await;
            assert_eq!(Harness::reply_text(&named), "What should I call you?");
            assert_eq!(named.flow.as_ref().unwrap().progress_percent, 20);

            h.say("Ana").await;
            h.say("sleep better, read more").await;
            let prefs = h.say("UTC, en").await;

            // Then the skill ran and the provider phrased the reply
            assert_eq!(prefs.messages.len(), 3);
            assert!(matches!(
                prefs.messages[1].payload(),
                Some(MessagePayload::Skill { invocation }) if invocation.is_success()
            ));
            assert_eq!(Harness::reply_text(&prefs), "Great, you're set up!");
            let view = prefs.flow.as_ref().unwrap();
            assert_eq!(view.current_step.as_str(), "conclusion");
            assert!(view.pending_skill.is_none());

            let done = h.say("thanks").await;
            assert_eq!(Harness::reply_text(&done), "Onboarding complete. Welcome aboard!");
            let view = done.flow.as_ref().unwrap();
            assert_eq!(view.status, FlowStatus::Completed);
            assert_eq!(view.progress_percent, 100);
            assert_eq!(view.data["name"], "Ana");
            assert_eq!(provider.call_count(), 1);

            // And a second onboarding is refused
            let err = h
                .orchestrator
                .start_flow(&ana(), h.conversation, FlowKind::Onboarding)
                .await
                .unwrap_err();
            assert_eq!(err, CoreError::FlowAlreadyCompleted { kind: FlowKind::Onboarding });
        }

        #[tokio::test]
        async fn second_start_resumes() {
            let h = with_router(ProviderRouter::local_only());
            h.orchestrator
                .start_flow(&ana(), h.conversation, FlowKind::Onboarding)
                .await
                .unwrap();
            h.say("hi").await;

            let again = h
                .orchestrator
                .start_flow(&ana(), h.conversation, FlowKind::Onboarding)
                .await
                .unwrap();

            let text = Harness::reply_text(&again);
            assert!(text.starts_with("Welcome back!"));
            assert!(text.ends_with("What should I call you?"));
        }

        #[tokio::test]
        async fn skipping_ends_onboarding_at_conclusion() {
            let h = with_router(ProviderRouter::local_only());
            h.orchestrator
                .start_flow(&ana(), h.conversation, FlowKind::Onboarding)
                .await
                .unwrap();

            let skipped = h
                .orchestrator
                .skip_step(&ana(), h.conversation, FlowKind::Onboarding)
                .await
                .unwrap();

            let view = skipped.flow.unwrap();
            assert_eq!(view.status, FlowStatus::Skipped);
            assert_eq!(view.current_step.as_str(), "conclusion");
        }
    }

    mod validation {
        use super::*;

        #[tokio::test]
        async fn rejected_input_reprompts_without_changing_state() {
            let h = with_router(ProviderRouter::local_only());
            h.orchestrator
                .start_flow(&ana(), h.conversation, FlowKind::CheckIn)
                .await
                .unwrap();

            let outcome = h.say("9").await;

            assert!(Harness::reply_text(&outcome).starts_with("That didn't work"));
            assert!(matches!(outcome.notices[..], [TurnNotice::ValidationError { .. }]));
            assert!(matches!(
                outcome.reply().unwrap().payload(),
                Some(MessagePayload::ValidationErrors { step, .. }) if step == "mood"
            ));
            assert_eq!(outcome.flow.unwrap().version, 1);
        }

        #[tokio::test]
        async fn mandatory_step_cannot_be_skipped() {
            let h = with_router(ProviderRouter::local_only());
            h.orchestrator
                .start_flow(&ana(), h.conversation, FlowKind::CheckIn)
                .await
                .unwrap();

            let err = h
                .orchestrator
                .skip_step(&ana(), h.conversation, FlowKind::CheckIn)
                .await
                .unwrap_err();

            assert!(matches!(err, CoreError::StepMandatory { kind: FlowKind::CheckIn, .. }));
        }
    }

    mod degraded {
        use super::*;

        #[tokio::test]
        async fn generative_step_falls_back_to_deterministic_text() {
            // Given no providers configured
            let h = with_router(ProviderRouter::local_only());
            h.orchestrator
                .start_flow(&ana(), h.conversation, FlowKind::CheckIn)
                .await
                .unwrap();
            h.say("4").await;
            h.say("3").await;
            h.say("shipped the demo").await;

            // When the generative last step is answered
            let outcome = h.say("nothing").await;

            // Then the flow still completes with the fallback text
            assert!(outcome.is_degraded());
            assert_eq!(Harness::reply_text(&outcome), "Thanks for checking in!");
            assert_eq!(
                outcome.reply().unwrap().payload(),
                Some(&MessagePayload::Degraded {
                    reason: "no_providers".into()
                })
            );
            assert_eq!(outcome.flow.unwrap().status, FlowStatus::Completed);
        }

        #[tokio::test]
        async fn date_question_renders_raw_skill_result() {
            let h = with_router(ProviderRouter::local_only());

            let outcome = h.say("what's the date today?").await;

            assert!(outcome.is_degraded());
            let text = Harness::reply_text(&outcome);
            assert!(text.starts_with("Here's what I found:\n"));
            assert!(text.contains("day_of_week"));
        }

        #[tokio::test]
        async fn plain_chat_uses_router_fallback_text() {
            let h = with_router(ProviderRouter::local_only());

            let outcome = h.say("hello").await;

            assert_eq!(Harness::reply_text(&outcome), crate::application::DEFAULT_FALLBACK_TEXT);
            assert!(outcome.reply().unwrap().is_degraded());
        }
    }

    mod free_chat {
        use super::*;

        #[tokio::test]
        async fn provider_reply_is_stored_after_user_message() {
            let provider = ScriptedProvider::new("scripted").then_reply("Hello there");
            let h = with_router(scripted(&provider));

            let outcome = h.say("hi coach").await;

            assert_eq!(outcome.messages.len(), 2);
            assert!(outcome.messages[0].is_user());
            assert_eq!(Harness::reply_text(&outcome), "Hello there");
            assert!(outcome.notices.is_empty());
            assert_eq!(provider.prompts()[0].last_user_content(), Some("hi coach"));

            let stored = h.conversations.find(h.conversation).await.unwrap().unwrap();
            assert_eq!(stored.message_count(), 2);
        }

        #[tokio::test]
        async fn date_intent_result_is_given_to_provider() {
            let provider = ScriptedProvider::new("scripted").then_reply("It's Friday.");
            let h = with_router(scripted(&provider));

            let outcome = h.say("what day is it").await;

            assert_eq!(Harness::reply_text(&outcome), "It's Friday.");
            let system = provider.prompts()[0].system.clone().unwrap();
            assert!(system.contains("get_current_date"));
        }
    }

    mod profile {
        use super::*;

        async fn onboard(h: &Harness) {
            h.orchestrator
                .start_flow(&ana(), h.conversation, FlowKind::Onboarding)
                .await
                .unwrap();
            for answer in ["hi", "Ana", "sleep better, read more", "America/Sao_Paulo, pt-BR", "thanks"] {
                h.say(answer).await;
            }
        }

        #[tokio::test]
        async fn date_question_uses_onboarding_timezone() {
            // Given a user who finished onboarding in Sao Paulo
            let h = with_router(ProviderRouter::local_only());
            onboard(&h).await;

            // When they ask for the time
            let outcome = h.say("what time is it?").await;

            // Then the skill answered for their timezone
            let text = Harness::reply_text(&outcome);
            assert!(text.contains("\"timezone\": \"America/Sao_Paulo\""));
        }

        #[tokio::test]
        async fn preferences_question_reports_profile() {
            let h = with_router(ProviderRouter::local_only());
            onboard(&h).await;

            let outcome = h.say("show my preferences").await;

            let text = Harness::reply_text(&outcome);
            assert!(text.contains("Ana"));
            assert!(text.contains("pt-BR"));
            assert!(!outcome
                .notices
                .iter()
                .any(|n| matches!(n, TurnNotice::SkillError { .. })));
        }

        #[tokio::test]
        async fn preferences_before_onboarding_is_a_skill_error() {
            let h = with_router(ProviderRouter::local_only());

            let outcome = h.say("show my preferences").await;

            assert!(matches!(
                &outcome.notices[..],
                [TurnNotice::SkillError { skill, .. }] if skill == "get_user_preferences"
            ));
        }

        #[tokio::test]
        async fn free_chat_prompt_carries_profile() {
            let provider = ScriptedProvider::new("scripted").otherwise_reply("Sure.");
            let h = with_router(scripted(&provider));
            onboard(&h).await;

            h.say("any tips for tomorrow?").await;

            let system = provider.prompts().last().unwrap().system.clone().unwrap();
            assert!(system.contains("Name: Ana"));
            assert!(system.contains("Goals: sleep better, read more"));
            assert!(system.contains("Timezone: America/Sao_Paulo"));
        }
    }

    mod access {
        use super::*;

        #[tokio::test]
        async fn archived_conversation_refuses_turns() {
            let h = with_router(ProviderRouter::local_only());
            h.say("hello").await;
            h.orchestrator
                .archive_conversation(&ana(), h.conversation)
                .await
                .unwrap();

            let err = h
                .orchestrator
                .handle_turn(&ana(), h.conversation, RawInput::from("again"), None)
                .await
                .unwrap_err();

            assert_eq!(err.code(), ErrorCode::Forbidden);
        }

        #[tokio::test]
        async fn other_users_conversation_is_forbidden() {
            let h = with_router(ProviderRouter::local_only());
            h.say("hello").await;

            let err = h
                .orchestrator
                .chat_turn(&UserId::new("bo").unwrap(), h.conversation, "hi")
                .await
                .unwrap_err();

            assert!(matches!(err, CoreError::Forbidden(_)));
        }

        #[tokio::test]
        async fn explicit_kind_without_instance_is_not_active() {
            let h = with_router(ProviderRouter::local_only());
            let err = h
                .orchestrator
                .handle_turn(&ana(), h.conversation, RawInput::from("4"), Some(FlowKind::CheckIn))
                .await
                .unwrap_err();
            assert_eq!(err, CoreError::FlowNotActive { kind: FlowKind::CheckIn });
        }
    }

    mod concurrency {
        use super::*;

        #[tokio::test]
        async fn explicit_stale_version_is_a_conflict() {
            let h = with_router(ProviderRouter::local_only());
            h.orchestrator
                .start_flow(&ana(), h.conversation, FlowKind::CheckIn)
                .await
                .unwrap();
            h.say("4").await;

            let err = h
                .orchestrator
                .submit_step(&ana(), h.conversation, FlowKind::CheckIn, RawInput::from("3"), Some(1))
                .await
                .unwrap_err();

            assert_eq!(err.code(), ErrorCode::Conflict);
        }

        #[tokio::test]
        async fn versioned_submission_with_bad_input_is_a_validation_error() {
            // Given a check-in at version 1
            let h = with_router(ProviderRouter::local_only());
            h.orchestrator
                .start_flow(&ana(), h.conversation, FlowKind::CheckIn)
                .await
                .unwrap();

            // When an out-of-range mood is submitted against that version
            let err = h
                .orchestrator
                .submit_step(&ana(), h.conversation, FlowKind::CheckIn, RawInput::from("9"), Some(1))
                .await
                .unwrap_err();

            // Then the caller gets the field errors and nothing was stored
            assert!(matches!(&err, CoreError::Validation(errors) if errors.len() == 1));
            assert_eq!(err.code(), ErrorCode::ValidationFailed);
            let view = h
                .orchestrator
                .flow_status(&ana(), FlowKind::CheckIn)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(view.version, 1);
            let stored = h.conversations.find(h.conversation).await.unwrap().unwrap();
            assert_eq!(stored.message_count(), 1);

            // And a valid answer at the same version goes through
            let ok = h
                .orchestrator
                .submit_step(&ana(), h.conversation, FlowKind::CheckIn, RawInput::from("4"), Some(1))
                .await
                .unwrap();
            assert_eq!(ok.flow.unwrap().version, 2);
        }

        #[tokio::test]
        async fn simultaneous_turns_lose_no_updates() {
            // Given a check-in at its first step
            let h = with_router(ProviderRouter::local_only());
            h.orchestrator
                .start_flow(&ana(), h.conversation, FlowKind::CheckIn)
                .await
                .unwrap();

            // When two turns arrive together
            let (a, b) = tokio::join!(h.say("4"), h.say("2"));

            // Then both land, one after the other
            assert!(a.notices.is_empty() && b.notices.is_empty());
            let view = h
                .orchestrator
                .flow_status(&ana(), FlowKind::CheckIn)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(view.version, 3);
            assert_eq!(view.current_step.as_str(), "highlight");
        }
    }

    mod skills {
        use super::*;

        fn note_flow(skill: &str) -> FlowCatalog {
            let definition = FlowDefinition::builder(FlowKind::CheckIn)
                .step(
                    StepDefinition::new("note", "Anything to note?", InputRule::text("note", 1, 100))
                        .with_skill(SkillBinding::new(skill))
                        .then(Transition::goto("rating")),
                )
                .step(
                    StepDefinition::new("rating", "Rate your day from 1 to 5.", InputRule::scale("rating", 1, 5))
                        .then(Transition::Finish),
                )
                .build()
                .unwrap();
            FlowCatalog::new().with_definition(definition)
        }

        fn flaky_registry(calls: Arc<AtomicU32>) -> SkillRegistry {
            let mut registry = SkillRegistry::new();
            registry
                .register(
                    "flaky",
                    "Fails on its first call",
                    SkillSchema::object().optional("note", PropertySchema::string()),
                    move |args, _ctx| {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(SkillFailure::new("store offline"))
                        } else {
                            Ok(json!({ "summary": format!("Noted: {}", args["note"].as_str().unwrap_or("")) }))
                        }
                    },
                )
                .unwrap();
            registry
        }

        #[tokio::test]
        async fn failed_skill_is_retried_on_next_turn() {
            // Given a skill that fails once
            let calls = Arc::new(AtomicU32::new(0));
            let h = build(ProviderRouter::local_only(), note_flow("flaky"), flaky_registry(calls.clone()));
            h.orchestrator
                .start_flow(&ana(), h.conversation, FlowKind::CheckIn)
                .await
                .unwrap();

            // When the step is answered
            let failed = h.say("tired but ok").await;

            // Then the failure is reported and the next step is not asked
            assert!(matches!(&failed.notices[..], [TurnNotice::SkillError { skill, .. }] if skill == "flaky"));
            assert!(Harness::reply_text(&failed).contains("store offline"));
            assert_eq!(failed.flow.as_ref().unwrap().pending_skill.as_deref(), Some("flaky"));

            // When the user sends anything
            let retried = h.say("try again").await;

            // Then the skill runs again and the flow moves on
            assert!(retried.notices.is_empty());
            assert_eq!(Harness::reply_text(&retried), "Rate your day from 1 to 5.");
            let view = retried.flow.unwrap();
            assert!(view.pending_skill.is_none());
            assert_eq!(view.data["note"], "tired but ok");
            assert_eq!(calls.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn missing_skill_apologizes_and_moves_on() {
            let h = build(ProviderRouter::local_only(), note_flow("missing"), SkillRegistry::new());
            h.orchestrator
                .start_flow(&ana(), h.conversation, FlowKind::CheckIn)
                .await
                .unwrap();

            let outcome = h.say("all good").await;

            assert!(matches!(
                outcome.notices[..],
                [TurnNotice::Internal { code: ErrorCode::InternalError }]
            ));
            assert!(matches!(
                outcome.messages[1].payload(),
                Some(MessagePayload::Apology { .. })
            ));
            assert!(!outcome.messages[1].content().contains("missing"));
            assert_eq!(Harness::reply_text(&outcome), "Rate your day from 1 to 5.");
            assert!(outcome.flow.unwrap().pending_skill.is_none());
        }
    }
}
