//! User profile read from a completed onboarding.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::flow::StepData;

/// Name, goals and preferences collected during onboarding.
///
/// Every field is optional: onboarding steps may be skipped, and a profile
/// only ever reports what the user actually said.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: Option<String>,
    pub goals: Vec<String>,
    pub timezone: Option<String>,
    pub language: Option<String>,
}

impl UserProfile {
    pub fn from_onboarding(data: &StepData) -> Self {
        let text = |field: &str| {
            data.get(field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let goals = data
            .get("goals")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        Self {
            name: text("name"),
            goals,
            timezone: text("timezone"),
            language: text("language"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.goals.is_empty() && self.timezone.is_none() && self.language.is_none()
    }

    /// A single field by name, for filling skill arguments.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "name" => self.name.clone().map(Value::String),
            "goals" if !self.goals.is_empty() => Some(json!(self.goals)),
            "timezone" => self.timezone.clone().map(Value::String),
            "language" => self.language.clone().map(Value::String),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "goals": self.goals,
            "timezone": self.timezone,
            "language": self.language,
        })
    }

    /// One line per known fact, for a provider's system text.
    pub fn describe(&self) -> Option<String> {
        let mut lines = Vec::new();
        if let Some(name) = &self.name {
            lines.push(format!("- Name: {name}"));
        }
        if !self.goals.is_empty() {
            lines.push(format!("- Goals: {}", self.goals.join(", ")));
        }
        if let Some(timezone) = &self.timezone {
            lines.push(format!("- Timezone: {timezone}"));
        }
        if let Some(language) = &self.language {
            lines.push(format!("- Preferred language: {language}"));
        }
        if lines.is_empty() {
            return None;
        }
        Some(format!("What you know about the user:\n{}", lines.join("\n")))
    }
}
