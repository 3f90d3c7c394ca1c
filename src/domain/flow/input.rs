//! Raw user input and the per-step rules that validate it.

use chrono_tz::Tz;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::StepData;
use crate::domain::foundation::ValidationError;

/// What the user sent for the current step: free text or named fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawInput {
    Text(String),
    Fields(Map<String, Value>),
}

impl RawInput {
    pub fn text(text: impl Into<String>) -> Self {
        RawInput::Text(text.into())
    }

    /// Interprets a JSON body: objects are field maps, strings are text, and
    /// anything else is treated as its JSON text.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => RawInput::Fields(map),
            Value::String(text) => RawInput::Text(text),
            other => RawInput::Text(other.to_string()),
        }
    }

    /// How the input is recorded in the transcript.
    pub fn to_message_content(&self) -> String {
        match self {
            RawInput::Text(text) => text.clone(),
            RawInput::Fields(map) if map.len() == 1 => match map.values().next() {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            },
            RawInput::Fields(map) => Value::Object(map.clone()).to_string(),
        }
    }

    /// The value addressed to `field`.
    ///
    /// Free text answers whichever field the step asks for.
    fn value_for(&self, field: &str) -> Option<Value> {
        match self {
            RawInput::Text(text) => Some(Value::String(text.clone())),
            RawInput::Fields(map) => map.get(field).cloned(),
        }
    }

    fn text_for(&self, field: &str) -> Result<String, ValidationError> {
        match self.value_for(field) {
            Some(Value::String(s)) => Ok(s.trim().to_string()),
            Some(Value::Null) | None => Err(ValidationError::empty_field(field)),
            Some(other) => Ok(other.to_string()),
        }
    }
}

impl From<&str> for RawInput {
    fn from(text: &str) -> Self {
        RawInput::text(text)
    }
}

/// Values accepted by a step.
#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    /// Field/value pairs merged into the flow's data, in order.
    pub record: Vec<(String, Value)>,
    /// The step's primary answer, used by answer-conditional transitions.
    pub answer: Value,
}

impl Accepted {
    pub fn nothing() -> Self {
        Self {
            record: Vec::new(),
            answer: Value::Null,
        }
    }

    pub fn field(field: impl Into<String>, value: Value) -> Self {
        Self {
            record: vec![(field.into(), value.clone())],
            answer: value,
        }
    }
}

/// Escape hatch for steps whose input does not fit a stock rule.
pub trait StepValidator: Send + Sync {
    fn validate(&self, input: &RawInput, data: &StepData) -> Result<Accepted, Vec<ValidationError>>;
}

/// Declarative validation rule for a step.
#[derive(Clone)]
pub enum InputRule {
    /// Any input moves on; nothing is stored.
    Acknowledge,
    Text {
        field: String,
        min_len: usize,
        max_len: usize,
    },
    /// Comma, semicolon, newline, or " and " separated items.
    List {
        field: String,
        min_item_len: usize,
        max_items: usize,
    },
    /// IANA `Area/Location` names, `UTC`, or a few city shortcuts.
    Timezone { field: String },
    /// Case-insensitive match against a fixed option list.
    Choice { field: String, options: Vec<String> },
    /// Whole number within inclusive bounds.
    Scale { field: String, min: i64, max: i64 },
    /// Yes or no. Stored only when `field` is set.
    Confirm { field: Option<String> },
    Custom(Arc<dyn StepValidator>),
}

impl fmt::Debug for InputRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputRule::Acknowledge => write!(f, "Acknowledge"),
            InputRule::Text { field, min_len, max_len } => {
                write!(f, "Text({field}, {min_len}..={max_len})")
            }
            InputRule::List { field, min_item_len, max_items } => {
                write!(f, "List({field}, item>={min_item_len}, n<={max_items})")
            }
            InputRule::Timezone { field } => write!(f, "Timezone({field})"),
            InputRule::Choice { field, options } => write!(f, "Choice({field}, {options:?})"),
            InputRule::Scale { field, min, max } => write!(f, "Scale({field}, {min}..={max})"),
            InputRule::Confirm { field } => write!(f, "Confirm({field:?})"),
            InputRule::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl InputRule {
    pub fn text(field: impl Into<String>, min_len: usize, max_len: usize) -> Self {
        InputRule::Text {
            field: field.into(),
            min_len,
            max_len,
        }
    }

    pub fn list(field: impl Into<String>, min_item_len: usize, max_items: usize) -> Self {
        InputRule::List {
            field: field.into(),
            min_item_len,
            max_items,
        }
    }

    pub fn timezone(field: impl Into<String>) -> Self {
        InputRule::Timezone { field: field.into() }
    }

    pub fn choice<S: Into<String>>(field: impl Into<String>, options: impl IntoIterator<Item = S>) -> Self {
        InputRule::Choice {
            field: field.into(),
            options: options.into_iter().map(Into::into).collect(),
        }
    }

    pub fn scale(field: impl Into<String>, min: i64, max: i64) -> Self {
        InputRule::Scale {
            field: field.into(),
            min,
            max,
        }
    }

    pub fn confirm() -> Self {
        InputRule::Confirm { field: None }
    }

    pub fn custom(validator: impl StepValidator + 'static) -> Self {
        InputRule::Custom(Arc::new(validator))
    }

    /// Validates `input`. Never looks at anything but the input and the
    /// data accumulated so far.
    pub fn validate(&self, input: &RawInput, data: &StepData) -> Result<Accepted, Vec<ValidationError>> {
        match self {
            InputRule::Acknowledge => Ok(Accepted::nothing()),
            InputRule::Text { field, min_len, max_len } => {
                let text = input.text_for(field).map_err(|e| vec![e])?;
                check_length(field, &text, *min_len, *max_len).map_err(|e| vec![e])?;
                Ok(Accepted::field(field, Value::String(text)))
            }
            InputRule::List { field, min_item_len, max_items } => {
                validate_list(input, field, *min_item_len, *max_items)
            }
            InputRule::Timezone { field } => {
                let text = input.text_for(field).map_err(|e| vec![e])?;
                if text.is_empty() {
                    return Err(vec![ValidationError::empty_field(field)]);
                }
                normalize_timezone(&text)
                    .map(|tz| Accepted::field(field, Value::String(tz)))
                    .ok_or_else(|| {
                        vec![ValidationError::invalid_format(
                            field,
                            "expected a timezone such as America/Sao_Paulo or UTC",
                        )]
                    })
            }
            InputRule::Choice { field, options } => {
                let text = input.text_for(field).map_err(|e| vec![e])?;
                options
                    .iter()
                    .find(|opt| opt.eq_ignore_ascii_case(&text))
                    .map(|opt| Accepted::field(field, Value::String(opt.clone())))
                    .ok_or_else(|| vec![ValidationError::invalid_choice(field, options.clone())])
            }
            InputRule::Scale { field, min, max } => {
                let n = parse_whole_number(input.value_for(field), field).map_err(|e| vec![e])?;
                if n < *min || n > *max {
                    return Err(vec![ValidationError::out_of_range(field, *min, *max, n)]);
                }
                Ok(Accepted::field(field, Value::from(n)))
            }
            InputRule::Confirm { field } => {
                let key = field.as_deref().unwrap_or("confirm");
                let answer = parse_confirmation(input.value_for(key), key).map_err(|e| vec![e])?;
                Ok(match field {
                    Some(field) => Accepted::field(field, Value::Bool(answer)),
                    None => Accepted {
                        record: Vec::new(),
                        answer: Value::Bool(answer),
                    },
                })
            }
            InputRule::Custom(validator) => validator.validate(input, data),
        }
    }
}

fn check_length(field: &str, text: &str, min: usize, max: usize) -> Result<(), ValidationError> {
    let len = text.chars().count();
    if len == 0 {
        return Err(ValidationError::empty_field(field));
    }
    if len < min {
        return Err(ValidationError::too_short(field, min, len));
    }
    if len > max {
        return Err(ValidationError::too_long(field, max, len));
    }
    Ok(())
}

fn validate_list(
    input: &RawInput,
    field: &str,
    min_item_len: usize,
    max_items: usize,
) -> Result<Accepted, Vec<ValidationError>> {
    let items: Vec<String> = match input.value_for(field) {
        Some(Value::Array(values)) => values
            .into_iter()
            .map(|v| match v {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(text)) => split_items(&text),
        _ => Vec::new(),
    };

    if items.is_empty() {
        return Err(vec![ValidationError::empty_field(field)]);
    }
    if items.len() > max_items {
        return Err(vec![ValidationError::out_of_range(
            field,
            1,
            max_items as i64,
            items.len() as i64,
        )]);
    }

    let errors: Vec<_> = items
        .iter()
        .filter_map(|item| {
            let len = item.chars().count();
            (len < min_item_len).then(|| ValidationError::too_short(field, min_item_len, len))
        })
        .collect();
    if !errors.is_empty() {
        return Err(errors);
    }

    let value = Value::Array(items.into_iter().map(Value::String).collect());
    Ok(Accepted::field(field, value))
}

/// Splits free text into list items.
pub fn split_items(text: &str) -> Vec<String> {
    text.split([',', ';', '\n'])
        .flat_map(|chunk| chunk.split(" and "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Lowercased shortcuts users type instead of an IANA name.
static TIMEZONE_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("utc", "UTC"),
        ("gmt", "UTC"),
        ("etc/utc", "UTC"),
        ("z", "UTC"),
        ("sao paulo", "America/Sao_Paulo"),
        ("são paulo", "America/Sao_Paulo"),
        ("brasilia", "America/Sao_Paulo"),
        ("brasília", "America/Sao_Paulo"),
        ("london", "Europe/London"),
        ("new york", "America/New_York"),
        ("lisbon", "Europe/Lisbon"),
        ("lisboa", "Europe/Lisbon"),
    ])
});

/// Resolves a user-supplied timezone against the IANA database.
///
/// Case is ignored and spaces stand for underscores, so `america/new york`
/// resolves to `America/New_York`. City shortcuts are tried first.
pub fn parse_timezone(raw: &str) -> Option<Tz> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();
    if let Some(zone) = TIMEZONE_ALIASES.get(lower.as_str()) {
        return zone.parse().ok();
    }
    Tz::from_str_insensitive(&trimmed.replace(' ', "_")).ok()
}

/// Canonical IANA name for a user-supplied timezone, or `None` when the
/// database does not know it.
pub fn normalize_timezone(raw: &str) -> Option<String> {
    parse_timezone(raw).map(|tz| tz.name().to_string())
}

fn parse_whole_number(value: Option<Value>, field: &str) -> Result<i64, ValidationError> {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| ValidationError::invalid_format(field, "expected a whole number")),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ValidationError::empty_field(field)),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| ValidationError::invalid_format(field, "expected a whole number")),
        Some(Value::Null) | None => Err(ValidationError::empty_field(field)),
        Some(_) => Err(ValidationError::invalid_format(field, "expected a whole number")),
    }
}

const AFFIRMATIVE: &[&str] = &["yes", "y", "yep", "yeah", "sure", "ok", "okay", "confirm", "sim", "true"];
const NEGATIVE: &[&str] = &["no", "n", "nope", "not yet", "nao", "não", "false"];

fn parse_confirmation(value: Option<Value>, field: &str) -> Result<bool, ValidationError> {
    let text = match value {
        Some(Value::Bool(b)) => return Ok(b),
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => return Err(ValidationError::empty_field(field)),
        Some(other) => other.to_string(),
    };

    let normalized = text
        .trim()
        .trim_end_matches(['.', '!'])
        .to_lowercase();
    if normalized.is_empty() {
        Err(ValidationError::empty_field(field))
    } else if AFFIRMATIVE.contains(&normalized.as_str()) {
        Ok(true)
    } else if NEGATIVE.contains(&normalized.as_str()) {
        Ok(false)
    } else {
        Err(ValidationError::invalid_choice(field, ["yes", "no"]))
    }
}
