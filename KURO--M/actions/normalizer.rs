use serde::Deserialize;
use serde_json::{Map, Value};

use crate::actions::{Action, Arguments, Plan};

const NAME_KEYS: [&str; 3] = ["function", "name", "tool"];
const ARGUMENT_KEYS: [&str; 3] = ["arguments", "args", "parameters"];

/// Oracle output before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawDecision {
    /// A JSON array of candidate action objects.
    ActionList(Vec<Value>),
    /// A single JSON object describing one action.
    SingleAction(Map<String, Value>),
    /// Anything else; holds the original text.
    Unparseable(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireDecision {
    List(Vec<Value>),
    Single(Map<String, Value>),
}

impl From<WireDecision> for RawDecision {
    fn from(wire: WireDecision) -> Self {
        match wire {
            WireDecision::List(items) => Self::ActionList(items),
            WireDecision::Single(object) => Self::SingleAction(object),
        }
    }
}

impl RawDecision {
    /// Decodes oracle text. Prose around a JSON object or array is tolerated.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Self::Unparseable(String::new());
        }
        if let Ok(wire) = serde_json::from_str::<WireDecision>(trimmed) {
            return wire.into();
        }
        embedded_json(trimmed)
            .and_then(|slice| serde_json::from_str::<WireDecision>(slice).ok())
            .map_or_else(|| Self::Unparseable(trimmed.to_string()), Self::from)
    }

    /// Decodes an already-parsed JSON value.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::ActionList(items),
            Value::Object(object) => Self::SingleAction(object),
            other => Self::Unparseable(other.to_string()),
        }
    }
}

/// Converts a raw decision into an ordered plan.
///
/// A single object without a usable name, empty text and unparseable text all
/// become [`Plan::fallback`]. List entries without a name are dropped; a list
/// whose entries are all dropped yields an empty plan.
#[must_use]
pub fn normalize(raw: RawDecision) -> Plan {
    match raw {
        RawDecision::SingleAction(object) => action_from_object(&object)
            .map_or_else(Plan::fallback, |action| Plan::new(vec![action])),
        RawDecision::ActionList(items) => items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| {
                let action = item.as_object().and_then(action_from_object);
                if action.is_none() {
                    tracing::warn!(index, entry = %item, "dropping plan entry without an action name");
                }
                action
            })
            .collect(),
        RawDecision::Unparseable(text) => {
            tracing::warn!(raw = %text, "decision could not be parsed; using fallback reply");
            Plan::fallback()
        }
    }
}

fn action_from_object(object: &Map<String, Value>) -> Option<Action> {
    let name = NAME_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|name| !name.is_empty())?;
    let arguments = ARGUMENT_KEYS
        .iter()
        .find_map(|key| object.get(*key))
        .map(arguments_from_value)
        .unwrap_or_default();
    Some(Action::new(name, arguments))
}

fn arguments_from_value(value: &Value) -> Arguments {
    match value {
        Value::Object(map) => map.clone(),
        // Some models send the arguments object as an encoded string.
        Value::String(encoded) => serde_json::from_str(encoded).unwrap_or_default(),
        _ => Arguments::new(),
    }
}

/// Outermost `[..]` or `{..}` span, whichever opens first.
fn embedded_json(text: &str) -> Option<&str> {
    let span = |open: char, close: char| {
        let start = text.find(open)?;
        let end = text.rfind(close)?;
        (end > start).then_some((start, end))
    };
    let (start, end) = match (span('[', ']'), span('{', '}')) {
        (Some(array), Some(object)) => {
            if array.0 < object.0 {
                array
            } else {
                object
            }
        }
        (array, object) => array.or(object)?,
    };
    Some(&text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::FALLBACK_REPLY;
    use serde_json::json;

    fn plan(text: &str) -> Plan {
        normalize(RawDecision::from_text(text))
    }

    #[test]
    fn single_object_becomes_one_action() {
        let plan = plan(r#"{"function": "save_memory", "arguments": {"text": "I like coffee"}}"#);
        assert_eq!(plan.names(), vec!["save_memory"]);
        assert_eq!(plan.actions()[0].arguments()["text"], json!("I like coffee"));
    }

    #[test]
    fn name_and_argument_aliases_are_accepted() {
        let by_name = plan(r#"{"name": "open_app", "args": {"app_name": "notepad"}}"#);
        let by_tool = plan(r#"{"tool": "web_search", "parameters": {"query": "rust"}}"#);
        assert_eq!(by_name.names(), vec!["open_app"]);
        assert_eq!(by_name.actions()[0].arguments()["app_name"], json!("notepad"));
        assert_eq!(by_tool.actions()[0].arguments()["query"], json!("rust"));
    }

    #[test]
    fn missing_arguments_default_to_empty() {
        let plan = plan(r#"{"function": "tell_joke"}"#);
        assert!(plan.actions()[0].arguments().is_empty());
    }

    #[test]
    fn list_keeps_order_and_drops_nameless_entries() {
        let plan = plan(
            r#"[{"function": "reply", "arguments": {"message": "a"}},
                {"arguments": {"x": 1}},
                42,
                {"function": "tell_joke"}]"#,
        );
        assert_eq!(plan.names(), vec!["reply", "tell_joke"]);
    }

    #[test]
    fn list_of_invalid_entries_is_empty() {
        assert!(plan(r#"[{"arguments": {}}, "text"]"#).is_empty());
        assert!(plan("[]").is_empty());
    }

    #[test]
    fn malformed_outputs_fall_back_to_reply() {
        for text in ["", "   ", "not json at all", "42", r#"{"arguments": {}}"#, r#"{"function": ""}"#] {
            let plan = plan(text);
            assert_eq!(plan.names(), vec!["reply"], "input {text:?}");
            assert_eq!(plan.actions()[0].arguments()["message"], json!(FALLBACK_REPLY));
        }
    }

    #[test]
    fn prose_around_json_is_tolerated() {
        let plan = plan(
            "Sure! Here is my decision:\n```json\n{\"function\": \"tell_joke\", \"arguments\": {}}\n```",
        );
        assert_eq!(plan.names(), vec!["tell_joke"]);
    }

    #[test]
    fn string_encoded_arguments_are_decoded() {
        let plan = plan(r#"{"function": "recall_memory", "arguments": "{\"query\": \"coffee\"}"}"#);
        assert_eq!(plan.actions()[0].arguments()["query"], json!("coffee"));
    }

    #[test]
    fn from_value_classifies_shapes() {
        assert!(matches!(RawDecision::from_value(json!([])), RawDecision::ActionList(_)));
        assert!(matches!(RawDecision::from_value(json!({})), RawDecision::SingleAction(_)));
        assert!(matches!(RawDecision::from_value(json!("x")), RawDecision::Unparseable(_)));
    }
}
