//! Declared tool parameter schemas.
//!
//! Each tool registers its parameters explicitly; validation and the published
//! `inputSchema` are both derived from the same declaration, so there is no
//! runtime reflection over handler signatures.

use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array(Box<ParamType>),
    OneOf(Vec<ParamType>),
}

impl ParamType {
    pub fn array_of(item: ParamType) -> Self {
        ParamType::Array(Box::new(item))
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array(item) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|v| item.matches(v))),
            ParamType::OneOf(options) => options.iter().any(|t| t.matches(value)),
        }
    }

    fn describe(&self) -> String {
        match self {
            ParamType::String => "a string".to_string(),
            ParamType::Integer => "an integer".to_string(),
            ParamType::Number => "a number".to_string(),
            ParamType::Boolean => "a boolean".to_string(),
            ParamType::Object => "an object".to_string(),
            ParamType::Array(item) => format!("an array of {}", item.describe_plain()),
            ParamType::OneOf(options) => options
                .iter()
                .map(ParamType::describe)
                .collect::<Vec<_>>()
                .join(" or "),
        }
    }

    fn describe_plain(&self) -> String {
        match self {
            ParamType::String => "strings".to_string(),
            ParamType::Integer => "integers".to_string(),
            ParamType::Number => "numbers".to_string(),
            ParamType::Boolean => "booleans".to_string(),
            ParamType::Object => "objects".to_string(),
            ParamType::Array(_) => "arrays".to_string(),
            ParamType::OneOf(options) => options
                .iter()
                .map(ParamType::describe_plain)
                .collect::<Vec<_>>()
                .join(" or "),
        }
    }

    pub fn to_json_schema(&self) -> Value {
        match self {
            ParamType::String => json!({ "type": "string" }),
            ParamType::Integer => json!({ "type": "integer" }),
            ParamType::Number => json!({ "type": "number" }),
            ParamType::Boolean => json!({ "type": "boolean" }),
            ParamType::Object => json!({ "type": "object" }),
            ParamType::Array(item) => json!({ "type": "array", "items": item.to_json_schema() }),
            ParamType::OneOf(options) => json!({
                "oneOf": options.iter().map(ParamType::to_json_schema).collect::<Vec<_>>()
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub ty: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    pub allowed: Option<&'static [&'static str]>,
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
}

impl ParamSpec {
    pub fn required(name: &'static str, ty: ParamType, description: &'static str) -> Self {
        Self {
            name,
            description,
            ty,
            required: true,
            default: None,
            allowed: None,
            minimum: None,
            maximum: None,
        }
    }

    pub fn optional(name: &'static str, ty: ParamType, description: &'static str) -> Self {
        Self {
            required: false,
            ..Self::required(name, ty, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn allowed(mut self, values: &'static [&'static str]) -> Self {
        self.allowed = Some(values);
        self
    }

    pub fn range(mut self, minimum: Option<i64>, maximum: Option<i64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    fn check(&self, value: &Value) -> Result<(), SchemaViolation> {
        if !self.ty.matches(value) {
            return Err(SchemaViolation::TypeMismatch {
                name: self.name.to_string(),
                expected: self.ty.describe(),
            });
        }
        if let (Some(allowed), Some(raw)) = (self.allowed, value.as_str()) {
            if !allowed.contains(&raw) {
                return Err(SchemaViolation::NotAllowed {
                    name: self.name.to_string(),
                    allowed: allowed.join(", "),
                });
            }
        }
        if let Some(n) = value.as_i64() {
            if self.minimum.is_some_and(|min| n < min) || self.maximum.is_some_and(|max| n > max) {
                return Err(SchemaViolation::OutOfRange {
                    name: self.name.to_string(),
                    detail: bounds_text(self.minimum, self.maximum),
                });
            }
        } else if value.is_u64() && self.maximum.is_some() {
            return Err(SchemaViolation::OutOfRange {
                name: self.name.to_string(),
                detail: bounds_text(self.minimum, self.maximum),
            });
        }
        Ok(())
    }

    fn to_json_schema(&self) -> Value {
        let mut schema = self.ty.to_json_schema();
        let Some(map) = schema.as_object_mut() else {
            return schema;
        };
        map.insert("description".to_string(), json!(self.description));
        if let Some(default) = &self.default {
            map.insert("default".to_string(), default.clone());
        }
        if let Some(allowed) = self.allowed {
            map.insert("enum".to_string(), json!(allowed));
        }
        if let Some(min) = self.minimum {
            map.insert("minimum".to_string(), json!(min));
        }
        if let Some(max) = self.maximum {
            map.insert("maximum".to_string(), json!(max));
        }
        schema
    }
}

fn bounds_text(minimum: Option<i64>, maximum: Option<i64>) -> String {
    match (minimum, maximum) {
        (Some(min), Some(max)) => format!("expected {min}..={max}"),
        (Some(min), None) => format!("expected >= {min}"),
        (None, Some(max)) => format!("expected <= {max}"),
        (None, None) => "unbounded".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    #[error("arguments must be a JSON object")]
    NotAnObject,
    #[error("missing required parameter `{0}`")]
    Missing(String),
    #[error("parameter `{name}` must be {expected}")]
    TypeMismatch { name: String, expected: String },
    #[error("parameter `{name}` must be one of: {allowed}")]
    NotAllowed { name: String, allowed: String },
    #[error("parameter `{name}` is out of range ({detail})")]
    OutOfRange { name: String, detail: String },
}

impl SchemaViolation {
    pub fn parameter(&self) -> Option<&str> {
        match self {
            SchemaViolation::NotAnObject => None,
            SchemaViolation::Missing(name)
            | SchemaViolation::TypeMismatch { name, .. }
            | SchemaViolation::NotAllowed { name, .. }
            | SchemaViolation::OutOfRange { name, .. } => Some(name),
        }
    }
}

/// Parameter list for one tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSchema {
    pub params: Vec<ParamSpec>,
}

impl ParameterSchema {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    /// Checks `arguments` and returns only the declared parameters, with defaults filled in.
    ///
    /// `null` counts as absent. Undeclared keys are dropped.
    pub fn validate(&self, arguments: &Value) -> Result<Map<String, Value>, SchemaViolation> {
        let empty = Map::new();
        let provided = match arguments {
            Value::Null => &empty,
            Value::Object(map) => map,
            _ => return Err(SchemaViolation::NotAnObject),
        };

        let mut out = Map::new();
        for spec in &self.params {
            match provided.get(spec.name) {
                Some(value) if !value.is_null() => {
                    spec.check(value)?;
                    out.insert(spec.name.to_string(), value.clone());
                }
                _ if spec.required => return Err(SchemaViolation::Missing(spec.name.to_string())),
                _ => {
                    if let Some(default) = &spec.default {
                        out.insert(spec.name.to_string(), default.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for spec in &self.params {
            properties.insert(spec.name.to_string(), spec.to_json_schema());
            if spec.required {
                required.push(Value::String(spec.name.to_string()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn schema() -> ParameterSchema {
        ParameterSchema::new(vec![
            ParamSpec::required("session_id", ParamType::String, "Session id"),
            ParamSpec::optional("limit", ParamType::Integer, "Max items")
                .with_default(json!(10))
                .range(Some(1), Some(100)),
            ParamSpec::optional("status", ParamType::String, "Filter").allowed(&["active", "failed"]),
            ParamSpec::optional(
                "context_files",
                ParamType::array_of(ParamType::OneOf(vec![ParamType::String, ParamType::Object])),
                "Context specs",
            ),
        ])
    }

    #[test]
    fn fills_defaults_and_drops_unknown_keys() {
        let out = schema()
            .validate(&json!({"session_id": "s", "extra": true, "status": null}))
            .expect("valid");
        assert_eq!(Value::Object(out), json!({"session_id": "s", "limit": 10}));
    }

    #[test]
    fn missing_required_parameter_is_reported() {
        let err = schema().validate(&json!({})).expect_err("missing");
        assert_eq!(err, SchemaViolation::Missing("session_id".to_string()));
    }

    #[test]
    fn type_mismatch_and_ranges_are_rejected() {
        let err = schema()
            .validate(&json!({"session_id": 7}))
            .expect_err("type");
        assert_eq!(err.parameter(), Some("session_id"));

        let err = schema()
            .validate(&json!({"session_id": "s", "limit": 0}))
            .expect_err("range");
        assert!(matches!(err, SchemaViolation::OutOfRange { .. }));

        let err = schema()
            .validate(&json!({"session_id": "s", "status": "paused"}))
            .expect_err("enum");
        assert!(matches!(err, SchemaViolation::NotAllowed { .. }));

        let err = schema()
            .validate(&json!({"session_id": "s", "context_files": ["a", 3]}))
            .expect_err("array item");
        assert!(matches!(err, SchemaViolation::TypeMismatch { .. }));
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        assert_eq!(
            schema().validate(&json!([1, 2])),
            Err(SchemaViolation::NotAnObject)
        );
    }

    #[test]
    fn json_schema_lists_required_parameters() {
        let rendered = schema().to_json_schema();
        assert_eq!(rendered["required"], json!(["session_id"]));
        assert_eq!(rendered["properties"]["limit"]["default"], json!(10));
        assert_eq!(
            rendered["properties"]["status"]["enum"],
            json!(["active", "failed"])
        );
    }
}
