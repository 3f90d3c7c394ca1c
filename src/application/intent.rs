//! Keyword intent rules for free chat.
//!
//! A rule maps whole-word keywords to a skill name. The first rule with a
//! matching word wins; no match means the turn goes straight to a provider.
//! Arguments can be filled from the user's profile, so "what time is it?"
//! answers in the timezone given during onboarding.

use serde_json::{json, Value};

use crate::domain::profile::UserProfile;
use crate::domain::skills::builtin::{GET_CURRENT_DATE, GET_USER_PREFERENCES};

#[derive(Debug, Clone, PartialEq)]
pub struct IntentRule {
    pub skill: String,
    keywords: Vec<String>,
    pub args: Value,
    /// `(argument, profile field)` pairs filled when the argument is unset.
    profile_args: Vec<(String, String)>,
}

impl IntentRule {
    pub fn new<S: Into<String>>(skill: impl Into<String>, keywords: impl IntoIterator<Item = S>) -> Self {
        Self {
            skill: skill.into(),
            keywords: keywords
                .into_iter()
                .map(|k| k.into().to_lowercase())
                .collect(),
            args: json!({}),
            profile_args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_profile_arg(mut self, arg: impl Into<String>, field: impl Into<String>) -> Self {
        self.profile_args.push((arg.into(), field.into()));
        self
    }

    fn args_for(&self, profile: Option<&UserProfile>) -> Value {
        let mut args = self.args.clone();
        let Some(profile) = profile else {
            return args;
        };
        if let Some(map) = args.as_object_mut() {
            for (arg, field) in &self.profile_args {
                if map.contains_key(arg) {
                    continue;
                }
                if let Some(value) = profile.field(field) {
                    map.insert(arg.clone(), value);
                }
            }
        }
        args
    }

    fn matches(&self, words: &[String]) -> bool {
        words.iter().any(|w| self.keywords.contains(w))
    }
}

/// A skill call chosen for a free-chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentMatch {
    pub skill: String,
    pub args: Value,
}

#[derive(Debug, Clone, Default)]
pub struct IntentRules {
    rules: Vec<IntentRule>,
}

impl IntentRules {
    /// No rules: every free-chat turn goes to a provider.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: IntentRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn match_skill(&self, text: &str, profile: Option<&UserProfile>) -> Option<IntentMatch> {
        let words = words(text);
        self.rules
            .iter()
            .find(|rule| rule.matches(&words))
            .map(|rule| IntentMatch {
                skill: rule.skill.clone(),
                args: rule.args_for(profile),
            })
    }
}

/// Date and time questions go to `get_current_date`, in the user's timezone.
impl Default for IntentRule {
    fn default() -> Self {
        IntentRule::new(GET_CURRENT_DATE, ["date", "time", "today", "clock", "day"])
            .with_args(json!({ "format": "human" }))
            .with_profile_arg("timezone", "timezone")
    }
}

impl IntentRules {
    pub fn builtin() -> Self {
        Self::none().with_rule(IntentRule::default()).with_rule(IntentRule::new(
            GET_USER_PREFERENCES,
            ["preferences", "preferências", "settings", "configurações", "profile"],
        ))
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_questions_match_current_date_skill() {
        let rules = IntentRules::builtin();
        for text in ["What's the date?", "what TIME is it", "what day is today"] {
            let matched = rules.match_skill(text, None).unwrap();
            assert_eq!(matched.skill, GET_CURRENT_DATE);
            assert_eq!(matched.args["format"], "human");
            assert!(matched.args.get("timezone").is_none());
        }
    }

    fn ana_in_sao_paulo() -> UserProfile {
        UserProfile {
            name: Some("Ana".into()),
            timezone: Some("America/Sao_Paulo".into()),
            ..Default::default()
        }
    }

    #[test]
    fn date_question_uses_profile_timezone() {
        let matched = IntentRules::builtin()
            .match_skill("what time is it?", Some(&ana_in_sao_paulo()))
            .unwrap();
        assert_eq!(matched.args["timezone"], "America/Sao_Paulo");
        assert_eq!(matched.args["format"], "human");
    }

    #[test]
    fn explicit_argument_beats_profile() {
        let rules = IntentRules::none().with_rule(
            IntentRule::new(GET_CURRENT_DATE, ["time"])
                .with_args(json!({ "timezone": "UTC" }))
                .with_profile_arg("timezone", "timezone"),
        );
        let matched = rules.match_skill("time", Some(&ana_in_sao_paulo())).unwrap();
        assert_eq!(matched.args["timezone"], "UTC");
    }

    #[test]
    fn preference_questions_match_preferences_skill() {
        let rules = IntentRules::builtin();
        for text in ["show my preferences", "quais são minhas configurações?"] {
            assert_eq!(rules.match_skill(text, None).unwrap().skill, GET_USER_PREFERENCES);
        }
    }

    #[test]
    fn keywords_match_whole_words_only() {
        let rules = IntentRules::builtin();
        assert!(rules.match_skill("I need an update on sometimes", None).is_none());
        assert!(rules.match_skill("help me plan my week", None).is_none());
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = IntentRules::none()
            .with_rule(IntentRule::new("first", ["plan"]))
            .with_rule(IntentRule::new("second", ["plan", "week"]));
        assert_eq!(rules.match_skill("plan my week", None).unwrap().skill, "first");
        assert_eq!(rules.match_skill("this week", None).unwrap().skill, "second");
    }

    #[test]
    fn no_rules_never_match() {
        assert!(IntentRules::none().match_skill("what time is it", None).is_none());
    }
}
