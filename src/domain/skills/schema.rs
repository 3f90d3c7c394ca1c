//! Typed input contracts for skills.
//!
//! A deliberately small JSON-schema subset: an object with typed properties,
//! required names, enumerations, and length/range/size bounds. It renders to
//! real JSON Schema for tool definitions.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Ways skill arguments can violate their schema.
///
/// Details are meant for logs. Use `to_client_message()` for anything shown
/// to users.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaValidationError {
    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid type for field {field}: expected {expected}, got {actual}")]
    InvalidType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Array too short for field {field}: minimum {min}, got {actual}")]
    ArrayTooShort {
        field: String,
        min: usize,
        actual: usize,
    },

    #[error("Length of field {field} is {actual}, outside [{min}, {max}]")]
    LengthOutOfRange {
        field: String,
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("Value out of range for field {field}: {value} not in [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Field {field} must be one of {allowed}")]
    NotAllowed { field: String, allowed: String },

    #[error("Unexpected field: {field}")]
    UnknownField { field: String },

    #[error("Validation errors: {0:?}")]
    Multiple(Vec<SchemaValidationError>),
}

impl SchemaValidationError {
    /// Client-safe summary that does not echo values.
    pub fn to_client_message(&self) -> String {
        match self {
            SchemaValidationError::MissingRequired { field } => {
                format!("Missing required field: {}", field)
            }
            SchemaValidationError::InvalidType { field, expected, .. } => {
                format!("Invalid type for field '{}': expected {}", field, expected)
            }
            SchemaValidationError::ArrayTooShort { field, min, .. } => {
                format!("Field '{}' needs at least {} items", field, min)
            }
            SchemaValidationError::LengthOutOfRange { field, .. } => {
                format!("Field '{}' has an invalid length", field)
            }
            SchemaValidationError::OutOfRange { field, .. } => {
                format!("Field '{}' is out of range", field)
            }
            SchemaValidationError::NotAllowed { field, .. } => {
                format!("Field '{}' has an unsupported value", field)
            }
            SchemaValidationError::UnknownField { field } => {
                format!("Unexpected field '{}'", field)
            }
            SchemaValidationError::Multiple(errors) => {
                let messages: Vec<_> = errors.iter().map(|e| e.to_client_message()).collect();
                messages.join("; ")
            }
        }
    }

    /// The individual violations, flattened.
    pub fn violations(&self) -> Vec<&SchemaValidationError> {
        match self {
            SchemaValidationError::Multiple(errors) => {
                errors.iter().flat_map(|e| e.violations()).collect()
            }
            single => vec![single],
        }
    }

    fn collect(mut errors: Vec<SchemaValidationError>) -> Result<(), SchemaValidationError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(SchemaValidationError::Multiple(errors)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Array => "array",
            ValueType::Object => "object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::String => value.is_string(),
            ValueType::Integer => value.is_i64() || value.is_u64(),
            ValueType::Number => value.is_number(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Contract for one argument.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySchema {
    ty: ValueType,
    description: Option<String>,
    allowed: Option<Vec<Value>>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    min_items: Option<usize>,
}

impl PropertySchema {
    pub fn of(ty: ValueType) -> Self {
        Self {
            ty,
            description: None,
            allowed: None,
            min_length: None,
            max_length: None,
            minimum: None,
            maximum: None,
            min_items: None,
        }
    }

    pub fn string() -> Self {
        Self::of(ValueType::String)
    }

    pub fn integer() -> Self {
        Self::of(ValueType::Integer)
    }

    pub fn number() -> Self {
        Self::of(ValueType::Number)
    }

    pub fn boolean() -> Self {
        Self::of(ValueType::Boolean)
    }

    pub fn array() -> Self {
        Self::of(ValueType::Array)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn one_of<V: Into<Value>>(mut self, allowed: impl IntoIterator<Item = V>) -> Self {
        self.allowed = Some(allowed.into_iter().map(Into::into).collect());
        self
    }

    pub fn length(mut self, min: usize, max: usize) -> Self {
        self.min_length = Some(min);
        self.max_length = Some(max);
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.minimum = Some(min);
        self.maximum = Some(max);
        self
    }

    pub fn min_items(mut self, min: usize) -> Self {
        self.min_items = Some(min);
        self
    }

    fn check(&self, field: &str, value: &Value, errors: &mut Vec<SchemaValidationError>) {
        if !self.ty.matches(value) {
            errors.push(SchemaValidationError::InvalidType {
                field: field.to_string(),
                expected: self.ty.as_str().to_string(),
                actual: type_name(value).to_string(),
            });
            return;
        }

        if let Some(allowed) = &self.allowed {
            if !allowed.contains(value) {
                let rendered: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
                errors.push(SchemaValidationError::NotAllowed {
                    field: field.to_string(),
                    allowed: rendered.join(", "),
                });
            }
        }

        if let Some(text) = value.as_str() {
            let len = text.chars().count();
            let min = self.min_length.unwrap_or(0);
            let max = self.max_length.unwrap_or(usize::MAX);
            if len < min || len > max {
                errors.push(SchemaValidationError::LengthOutOfRange {
                    field: field.to_string(),
                    min,
                    max,
                    actual: len,
                });
            }
        }

        if let Some(n) = value.as_f64() {
            let below = self.minimum.map_or(false, |min| n < min);
            let above = self.maximum.map_or(false, |max| n > max);
            if below || above {
                errors.push(SchemaValidationError::OutOfRange {
                    field: field.to_string(),
                    value: value.to_string(),
                    min: self.minimum.map_or("-inf".into(), |m| m.to_string()),
                    max: self.maximum.map_or("inf".into(), |m| m.to_string()),
                });
            }
        }

        if let (Some(items), Some(min)) = (value.as_array(), self.min_items) {
            if items.len() < min {
                errors.push(SchemaValidationError::ArrayTooShort {
                    field: field.to_string(),
                    min,
                    actual: items.len(),
                });
            }
        }
    }

    fn to_json_schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".into(), json!(self.ty.as_str()));
        if let Some(d) = &self.description {
            schema.insert("description".into(), json!(d));
        }
        if let Some(allowed) = &self.allowed {
            schema.insert("enum".into(), Value::Array(allowed.clone()));
        }
        if let Some(v) = self.min_length {
            schema.insert("minLength".into(), json!(v));
        }
        if let Some(v) = self.max_length {
            schema.insert("maxLength".into(), json!(v));
        }
        if let Some(v) = self.minimum {
            schema.insert("minimum".into(), json!(v));
        }
        if let Some(v) = self.maximum {
            schema.insert("maximum".into(), json!(v));
        }
        if let Some(v) = self.min_items {
            schema.insert("minItems".into(), json!(v));
        }
        Value::Object(schema)
    }
}

/// Contract for a skill's whole argument object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SkillSchema {
    properties: BTreeMap<String, PropertySchema>,
    required: Vec<String>,
    additional_properties: bool,
}

impl SkillSchema {
    /// An object schema with no properties that rejects unknown fields.
    pub fn object() -> Self {
        Self::default()
    }

    pub fn optional(mut self, name: impl Into<String>, property: PropertySchema) -> Self {
        self.properties.insert(name.into(), property);
        self
    }

    pub fn required(mut self, name: impl Into<String>, property: PropertySchema) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.insert(name, property);
        self
    }

    pub fn allow_additional(mut self) -> Self {
        self.additional_properties = true;
        self
    }

    /// Checks `args` and reports every violation found.
    pub fn validate(&self, args: &Value) -> Result<(), SchemaValidationError> {
        let Some(object) = args.as_object() else {
            return Err(SchemaValidationError::InvalidType {
                field: "arguments".into(),
                expected: "object".into(),
                actual: type_name(args).into(),
            });
        };

        let mut errors = Vec::new();

        for name in &self.required {
            if object.get(name).map_or(true, Value::is_null) {
                errors.push(SchemaValidationError::MissingRequired { field: name.clone() });
            }
        }

        for (name, value) in object {
            match self.properties.get(name) {
                Some(_) if value.is_null() => {}
                Some(property) => property.check(name, value, &mut errors),
                None if self.additional_properties => {}
                None => errors.push(SchemaValidationError::UnknownField { field: name.clone() }),
            }
        }

        SchemaValidationError::collect(errors)
    }

    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, prop)| (name.clone(), prop.to_json_schema()))
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
            "additionalProperties": self.additional_properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_schema() -> SkillSchema {
        SkillSchema::object()
            .required("name", PropertySchema::string().length(2, 100))
            .required("goals", PropertySchema::array().min_items(1))
            .optional("language", PropertySchema::string().one_of(["en", "pt-BR"]))
            .optional("mood", PropertySchema::integer().range(1.0, 5.0))
    }

    #[test]
    fn valid_arguments_pass() {
        let args = json!({"name": "Ana", "goals": ["sleep"], "language": "en", "mood": 3});
        assert!(profile_schema().validate(&args).is_ok());
    }

    #[test]
    fn non_object_is_invalid_type() {
        let err = profile_schema().validate(&json!("Ana")).unwrap_err();
        assert!(matches!(err, SchemaValidationError::InvalidType { .. }));
    }

    #[test]
    fn single_violation_is_not_wrapped() {
        let err = profile_schema().validate(&json!({"name": "Ana"})).unwrap_err();
        assert_eq!(
            err,
            SchemaValidationError::MissingRequired {
                field: "goals".into()
            }
        );
    }

    #[test]
    fn every_violation_is_reported() {
        let args = json!({"name": 7, "goals": [], "language": "fr", "mood": 9, "extra": true});
        let err = profile_schema().validate(&args).unwrap_err();
        assert_eq!(err.violations().len(), 5);
    }

    #[test]
    fn null_counts_as_missing() {
        let err = profile_schema()
            .validate(&json!({"name": null, "goals": ["x"]}))
            .unwrap_err();
        assert_eq!(
            err,
            SchemaValidationError::MissingRequired {
                field: "name".into()
            }
        );
    }

    #[test]
    fn integer_rejects_fractions() {
        let err = profile_schema()
            .validate(&json!({"name": "Ana", "goals": ["x"], "mood": 2.5}))
            .unwrap_err();
        assert!(matches!(err, SchemaValidationError::InvalidType { .. }));
    }

    #[test]
    fn additional_properties_can_be_allowed() {
        let schema = SkillSchema::object().allow_additional();
        assert!(schema.validate(&json!({"anything": 1})).is_ok());
    }

    #[test]
    fn client_message_hides_values() {
        let err = SchemaValidationError::OutOfRange {
            field: "mood".into(),
            value: "9".into(),
            min: "1".into(),
            max: "5".into(),
        };
        assert!(!err.to_client_message().contains('9'));
    }

    #[test]
    fn renders_json_schema() {
        let rendered = profile_schema().to_json_schema();
        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["required"], json!(["name", "goals"]));
        assert_eq!(rendered["properties"]["name"]["minLength"], 2);
        assert_eq!(rendered["properties"]["language"]["enum"], json!(["en", "pt-BR"]));
        assert_eq!(rendered["additionalProperties"], false);
    }
}
