use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{actions::Arguments, capabilities::HandlerError};

/// Value shape accepted for a parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// Text; numbers and booleans are accepted and rendered as text.
    String,
    /// Whole number, either a JSON number or numeric text.
    Integer,
    /// `true`/`false`, or the strings `true`/`false`/`yes`/`no`.
    Boolean,
    /// Anything.
    Any,
}

impl ParamKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)),
            Self::Integer => as_integer(value).is_some(),
            Self::Boolean => as_flag(value).is_some(),
            Self::Any => true,
        }
    }

    const fn expectation(self) -> &'static str {
        match self {
            Self::String => "text",
            Self::Integer => "an integer",
            Self::Boolean => "a boolean",
            Self::Any => "any value",
        }
    }
}

/// One declared parameter of a capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParamSpec {
    /// Argument key.
    pub name: String,
    /// Description shown to the oracle and on `GET /tools`.
    pub description: String,
    /// Whether the argument must be present.
    pub required: bool,
    /// Accepted value shape.
    pub kind: ParamKind,
}

/// Ordered parameter list of a capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ArgumentSchema {
    params: Vec<ParamSpec>,
}

impl ArgumentSchema {
    /// Schema without parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a required parameter.
    #[must_use]
    pub fn required(self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.param(name, kind, description, true)
    }

    /// Adds an optional parameter.
    #[must_use]
    pub fn optional(self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.param(name, kind, description, false)
    }

    fn param(mut self, name: &str, kind: ParamKind, description: &str, required: bool) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            description: description.into(),
            required,
            kind,
        });
        self
    }

    /// Declared parameters in order.
    #[must_use]
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Checks `arguments` against the schema. Undeclared arguments are
    /// ignored; `null` counts as absent.
    pub fn bind(&self, arguments: &Arguments) -> Result<(), String> {
        for param in &self.params {
            match arguments.get(&param.name).filter(|value| !value.is_null()) {
                None if param.required => {
                    return Err(format!("missing required argument '{}'", param.name));
                }
                None => {}
                Some(value) if !param.kind.accepts(value) => {
                    return Err(format!(
                        "argument '{}' must be {}",
                        param.name,
                        param.kind.expectation()
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Text of a required argument.
pub fn required_text(arguments: &Arguments, name: &str) -> Result<String, HandlerError> {
    optional_text(arguments, name).ok_or_else(|| HandlerError::MissingArgument(name.into()))
}

/// Text of an optional argument; blank text counts as absent.
#[must_use]
pub fn optional_text(arguments: &Arguments, name: &str) -> Option<String> {
    let text = match arguments.get(name)? {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Integer value of an optional argument.
pub fn optional_integer(arguments: &Arguments, name: &str) -> Result<Option<i64>, HandlerError> {
    match arguments.get(name).filter(|value| !value.is_null()) {
        None => Ok(None),
        Some(value) => as_integer(value)
            .map(Some)
            .ok_or_else(|| HandlerError::InvalidArgument {
                name: name.into(),
                reason: "expected an integer".into(),
            }),
    }
}

/// Boolean flag; absent or unrecognized values are `false`.
#[must_use]
pub fn flag(arguments: &Arguments, name: &str) -> bool {
    arguments.get(name).and_then(as_flag).unwrap_or(false)
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    fn volume_schema() -> ArgumentSchema {
        ArgumentSchema::new()
            .required("action", ParamKind::String, "up/down/mute/unmute/set")
            .optional("level", ParamKind::Integer, "0-100")
    }

    #[test]
    fn bind_reports_missing_required_argument() {
        let err = volume_schema().bind(&args(json!({ "level": 10 }))).unwrap_err();
        assert_eq!(err, "missing required argument 'action'");
    }

    #[test]
    fn bind_rejects_wrong_kind() {
        let err = volume_schema()
            .bind(&args(json!({ "action": "set", "level": "loud" })))
            .unwrap_err();
        assert_eq!(err, "argument 'level' must be an integer");
    }

    #[test]
    fn bind_accepts_numeric_text_and_null_optional() {
        let schema = volume_schema();
        assert!(schema.bind(&args(json!({ "action": "set", "level": "40" }))).is_ok());
        assert!(schema.bind(&args(json!({ "action": "up", "level": null }))).is_ok());
    }

    #[test]
    fn accessors_normalize_values() {
        let arguments = args(json!({ "text": "  hi  ", "blank": " ", "confirmed": "YES", "n": 4.0 }));
        assert_eq!(required_text(&arguments, "text").unwrap(), "hi");
        assert!(optional_text(&arguments, "blank").is_none());
        assert!(flag(&arguments, "confirmed"));
        assert!(!flag(&arguments, "missing"));
        assert_eq!(optional_integer(&arguments, "n").unwrap(), Some(4));
    }
}
