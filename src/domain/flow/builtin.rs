//! Built-in flow definitions: onboarding, weekly plan, check-in.
//!
//! Prompts here are the deterministic fallbacks shown when no provider is
//! available; providers may rephrase them for generative steps.

use serde_json::{json, Value};

use super::{
    normalize_timezone, Accepted, ActivePolicy, DefinitionError, FlowDefinition, FlowKind,
    InputRule, RawInput, SkillBinding, SkipPolicy, StepData, StepDefinition, StepValidator,
    Transition,
};
use crate::domain::foundation::ValidationError;

pub const LANGUAGES: [&str; 2] = ["en", "pt-BR"];

/// Onboarding: welcome, name, goals, preferences, conclusion.
///
/// Resumes when started twice and cannot be repeated once completed.
pub fn onboarding() -> Result<FlowDefinition, DefinitionError> {
    FlowDefinition::builder(FlowKind::Onboarding)
        .step(StepDefinition::new(
            "welcome",
            "Welcome! I'm your productivity coach. I'll ask a few quick questions to get to know you. Ready?",
            InputRule::Acknowledge,
        ))
        .step(StepDefinition::new(
            "name",
            "What should I call you?",
            InputRule::text("name", 2, 100),
        ))
        .step(
            StepDefinition::new(
                "goals",
                "What are your main goals right now? Separate them with commas.",
                InputRule::list("goals", 3, 5),
            )
            .correctable(),
        )
        .step(
            StepDefinition::new(
                "preferences",
                "Which timezone are you in (for example America/Sao_Paulo or UTC), and do you prefer English (en) or Portuguese (pt-BR)?",
                InputRule::custom(PreferencesValidator),
            )
            .correctable()
            .with_skill(
                SkillBinding::new("complete_onboarding")
                    .with_fields(["name", "goals", "timezone", "language"]),
            )
            .generative(),
        )
        .step(
            StepDefinition::new(
                "conclusion",
                "You're all set. Say anything to finish, and we'll start with your first check-in whenever you like.",
                InputRule::Acknowledge,
            )
            .then(Transition::Finish),
        )
        .skip_to("conclusion")
        .on_active(ActivePolicy::Resume)
        .repeatable(false)
        .build()
}

/// Weekly plan: priorities, commitment, review (declining loops back).
pub fn weekly_plan() -> Result<FlowDefinition, DefinitionError> {
    FlowDefinition::builder(FlowKind::WeeklyPlan)
        .step(
            StepDefinition::new(
                "priorities",
                "What are your top priorities for this week? List up to five, separated by commas.",
                InputRule::list("priorities", 3, 5),
            )
            .mandatory()
            .correctable(),
        )
        .step(
            StepDefinition::new(
                "commitment",
                "What's one commitment you'll protect no matter what this week?",
                InputRule::text("commitment", 3, 280),
            )
            .correctable()
            .with_skill(SkillBinding::new("build_weekly_plan").with_fields(["priorities", "commitment"]))
            .generative(),
        )
        .step(
            StepDefinition::new(
                "review",
                "Does this plan work for you? (yes/no)",
                InputRule::confirm(),
            )
            .then(Transition::on_answer(
                json!(true),
                Transition::Finish,
                Transition::goto("priorities"),
            )),
        )
        .skip_to("review")
        .on_active(ActivePolicy::Reject)
        .build()
}

/// Check-in: mood, energy, highlight, blocker.
pub fn check_in() -> Result<FlowDefinition, DefinitionError> {
    FlowDefinition::builder(FlowKind::CheckIn)
        .step(
            StepDefinition::new(
                "mood",
                "How are you feeling today, from 1 (rough) to 5 (great)?",
                InputRule::scale("mood", 1, 5),
            )
            .mandatory(),
        )
        .step(StepDefinition::new(
            "energy",
            "And your energy level, from 1 to 5?",
            InputRule::scale("energy", 1, 5),
        ))
        .step(StepDefinition::new(
            "highlight",
            "What's one win since your last check-in?",
            InputRule::text("highlight", 1, 280),
        ))
        .step(
            StepDefinition::new(
                "blocker",
                "Is anything blocking you right now?",
                InputRule::text("blocker", 1, 280),
            )
            .with_skill(SkillBinding::new("record_check_in"))
            .generative()
            .then(Transition::Finish),
        )
        .skip_policy(SkipPolicy::NextStep)
        .on_active(ActivePolicy::Resume)
        .build()
}

/// Reads a timezone and a language from one answer.
///
/// Accepts `{"timezone": .., "language": ..}` or free text such as
/// "America/Sao_Paulo, pt-BR". Language defaults to English.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferencesValidator;

impl StepValidator for PreferencesValidator {
    fn validate(&self, input: &RawInput, _data: &StepData) -> Result<Accepted, Vec<ValidationError>> {
        let (tz_raw, lang_raw) = match input {
            RawInput::Fields(map) => (
                map.get("timezone").and_then(Value::as_str).map(str::to_string),
                map.get("language").and_then(Value::as_str).map(str::to_string),
            ),
            RawInput::Text(text) => split_preferences(text),
        };

        let mut errors = Vec::new();

        let timezone = match tz_raw.as_deref().map(str::trim) {
            None | Some("") => {
                errors.push(ValidationError::empty_field("timezone"));
                None
            }
            Some(raw) => match normalize_timezone(raw) {
                Some(tz) => Some(tz),
                None => {
                    errors.push(ValidationError::invalid_format(
                        "timezone",
                        "expected a timezone such as America/Sao_Paulo or UTC",
                    ));
                    None
                }
            },
        };

        let language = match lang_raw.as_deref().map(str::trim) {
            None | Some("") => Some(LANGUAGES[0].to_string()),
            Some(raw) => match LANGUAGES.iter().find(|l| l.eq_ignore_ascii_case(raw)) {
                Some(lang) => Some(lang.to_string()),
                None => {
                    errors.push(ValidationError::invalid_choice("language", LANGUAGES));
                    None
                }
            },
        };

        match (timezone, language) {
            (Some(timezone), Some(language)) if errors.is_empty() => Ok(Accepted {
                record: vec![
                    ("timezone".to_string(), Value::String(timezone.clone())),
                    ("language".to_string(), Value::String(language)),
                ],
                answer: Value::String(timezone),
            }),
            _ => Err(errors),
        }
    }
}

/// Splits "tz, lang" free text. A lone token is taken as the timezone.
fn split_preferences(text: &str) -> (Option<String>, Option<String>) {
    let mut parts = text
        .split([',', ';', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let first = parts.next().map(str::to_string);
    let second = parts.next().map(str::to_string);
    (first, second)
}
