//! End-to-end coaching sessions assembled from public parts: scripted
//! providers, in-memory repositories, built-in flows and skills.

use std::sync::Arc;

use coach_core::adapters::{InMemoryConversationRepository, InMemoryFlowRepository, ScriptedProvider};
use coach_core::application::{
    CoreError, FlowEngine, Orchestrator, ProviderRouter, RouterConfig, TurnNotice, TurnOutcome,
};
use coach_core::domain::conversation::{MessagePayload, Role};
use coach_core::domain::flow::{FlowCatalog, FlowKind, FlowStatus, RawInput};
use coach_core::domain::foundation::{ConversationId, UserId};
use coach_core::domain::skills::SkillRegistry;
use coach_core::ports::{ConversationRepository, ProviderAdapter};

#[derive(Clone)]
struct Storage {
    flows: InMemoryFlowRepository,
    conversations: InMemoryConversationRepository,
}

impl Storage {
    fn new() -> Self {
        Self {
            flows: InMemoryFlowRepository::new(),
            conversations: InMemoryConversationRepository::new(),
        }
    }

    /// A fresh orchestrator over the same storage, as after a restart.
    fn orchestrator(&self, router: ProviderRouter) -> Orchestrator {
        let engine = FlowEngine::new(
            Arc::new(self.flows.clone()),
            Arc::new(FlowCatalog::builtin().unwrap()),
        );
        Orchestrator::new(
            engine,
            Arc::new(self.conversations.clone()),
            Arc::new(router),
            Arc::new(SkillRegistry::with_builtin().unwrap()),
        )
    }
}

fn ana() -> UserId {
    UserId::new("ana").unwrap()
}

fn text(outcome: &TurnOutcome) -> &str {
    outcome.reply().unwrap().content()
}

async fn say(orchestrator: &Orchestrator, conversation: ConversationId, input: &str) -> TurnOutcome {
    orchestrator
        .handle_turn(&ana(), conversation, RawInput::from(input), None)
        .await
        .unwrap()
}

mod onboarding {
    use super::*;

    #[tokio::test]
    async fn progress_survives_a_restart() {
        // Given onboarding answered up to the name step
        let storage = Storage::new();
        let conversation = ConversationId::new();
        let first = storage.orchestrator(ProviderRouter::local_only());
        first
            .start_flow(&ana(), conversation, FlowKind::Onboarding)
            .await
            .unwrap();
        say(&first, conversation, "hi").await;
        say(&first, conversation, "Ana").await;
        drop(first);

        // When a new process picks the conversation up
        let second = storage.orchestrator(ProviderRouter::local_only());
        let goals = say(&second, conversation, "sleep better, read more").await;

        // Then the flow continues where it stopped
        assert!(text(&goals).starts_with("Which timezone are you in"));
        let view = goals.flow.as_ref().unwrap();
        assert_eq!(view.current_step.as_str(), "preferences");
        assert_eq!(view.data["name"], "Ana");

        // And finishing it works in degraded mode
        let prefs = say(&second, conversation, "America/Sao_Paulo, pt-BR").await;
        assert!(prefs.is_degraded());
        assert!(text(&prefs).starts_with("You're all set."));

        let done = say(&second, conversation, "ok").await;
        let view = done.flow.as_ref().unwrap();
        assert_eq!(view.status, FlowStatus::Completed);
        assert_eq!(view.data["timezone"], "America/Sao_Paulo");
        assert_eq!(view.data["language"], "pt-BR");
    }

    #[tokio::test]
    async fn transcript_keeps_every_turn_in_order() {
        let storage = Storage::new();
        let conversation = ConversationId::new();
        let orchestrator = storage.orchestrator(ProviderRouter::local_only());

        orchestrator
            .start_flow(&ana(), conversation, FlowKind::Onboarding)
            .await
            .unwrap();
        for answer in ["hi", "Ana", "sleep better, read more", "UTC, en", "thanks"] {
            say(&orchestrator, conversation, answer).await;
        }

        let stored = storage.conversations.find(conversation).await.unwrap().unwrap();
        let messages = stored.messages();
        // start + 2 per plain step + user/skill/reply for preferences
        assert_eq!(messages.len(), 1 + 2 + 2 + 2 + 3 + 2);
        assert!(messages
            .windows(2)
            .all(|pair| pair[0].created_at() <= pair[1].created_at()));

        let users: Vec<&str> = messages
            .iter()
            .filter(|m| m.role() == Role::User)
            .map(|m| m.content())
            .collect();
        assert_eq!(users, vec!["hi", "Ana", "sleep better, read more", "UTC, en", "thanks"]);

        assert!(messages.iter().any(|m| matches!(
            m.payload(),
            Some(MessagePayload::Skill { invocation }) if invocation.skill == "complete_onboarding"
        )));
    }
}

mod weekly_plan {
    use super::*;

    #[tokio::test]
    async fn declining_the_review_loops_back_to_priorities() {
        // Given a provider that phrases the plan
        let provider = ScriptedProvider::new("primary").otherwise_reply("Here's your week.");
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(provider.clone());
        let storage = Storage::new();
        let conversation = ConversationId::new();
        let orchestrator =
            storage.orchestrator(ProviderRouter::new(vec![adapter], RouterConfig::default()));

        let start = orchestrator
            .start_flow(&ana(), conversation, FlowKind::WeeklyPlan)
            .await
            .unwrap();
        assert!(text(&start).starts_with("What are your top priorities"));

        // When a second start is attempted
        let err = orchestrator
            .start_flow(&ana(), conversation, FlowKind::WeeklyPlan)
            .await
            .unwrap_err();

        // Then it is rejected
        assert!(matches!(err, CoreError::FlowAlreadyActive { kind: FlowKind::WeeklyPlan, .. }));

        say(&orchestrator, conversation, "ship demo, write docs, gym").await;
        let plan = say(&orchestrator, conversation, "protect mornings").await;
        assert_eq!(text(&plan), "Here's your week.");
        assert_eq!(plan.flow.as_ref().unwrap().current_step.as_str(), "review");

        // When the user declines
        let declined = say(&orchestrator, conversation, "no").await;

        // Then the flow asks for priorities again
        let view = declined.flow.as_ref().unwrap();
        assert_eq!(view.status, FlowStatus::InProgress);
        assert_eq!(view.current_step.as_str(), "priorities");

        say(&orchestrator, conversation, "ship demo, rest").await;
        say(&orchestrator, conversation, "protect evenings").await;
        let done = say(&orchestrator, conversation, "yes").await;

        assert_eq!(text(&done), "Your weekly plan is set. Have a focused week!");
        let view = done.flow.as_ref().unwrap();
        assert_eq!(view.status, FlowStatus::Completed);
        assert_eq!(view.data["priorities"], serde_json::json!(["ship demo", "rest"]));
        assert_eq!(view.data["commitment"], "protect evenings");
        assert_eq!(provider.call_count(), 2);
    }
}

mod check_in {
    use super::*;

    #[tokio::test]
    async fn free_chat_resumes_after_check_in() {
        let provider = ScriptedProvider::new("primary").otherwise_reply("Nice work today.");
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(provider.clone());
        let storage = Storage::new();
        let conversation = ConversationId::new();
        let orchestrator =
            storage.orchestrator(ProviderRouter::new(vec![adapter], RouterConfig::default()));

        orchestrator
            .start_flow(&ana(), conversation, FlowKind::CheckIn)
            .await
            .unwrap();
        let invalid = say(&orchestrator, conversation, "9").await;
        assert!(matches!(
            invalid.notices.as_slice(),
            [TurnNotice::ValidationError { .. }]
        ));
        assert_eq!(invalid.flow.as_ref().unwrap().version, 1);

        for answer in ["4", "3", "shipped the demo"] {
            say(&orchestrator, conversation, answer).await;
        }
        let done = say(&orchestrator, conversation, "nothing").await;
        assert_eq!(done.flow.as_ref().unwrap().status, FlowStatus::Completed);

        // Once no flow needs attention, turns are free chat
        let chat = say(&orchestrator, conversation, "how should I plan tomorrow?").await;
        assert!(chat.flow.is_none());
        assert_eq!(text(&chat), "Nice work today.");
    }
}

mod archiving {
    use super::*;

    #[tokio::test]
    async fn archived_conversation_refuses_turns() {
        let storage = Storage::new();
        let conversation = ConversationId::new();
        let orchestrator = storage.orchestrator(ProviderRouter::local_only());
        say(&orchestrator, conversation, "hello").await;

        orchestrator
            .archive_conversation(&ana(), conversation)
            .await
            .unwrap();
        let err = orchestrator
            .handle_turn(&ana(), conversation, RawInput::from("still there?"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn other_users_cannot_write_to_a_conversation() {
        let storage = Storage::new();
        let conversation = ConversationId::new();
        let orchestrator = storage.orchestrator(ProviderRouter::local_only());
        say(&orchestrator, conversation, "hello").await;

        let err = orchestrator
            .chat_turn(&UserId::new("bob").unwrap(), conversation, "hi")
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Forbidden(_)));
    }
}
