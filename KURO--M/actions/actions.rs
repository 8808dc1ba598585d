use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Named arguments carried by an [`Action`].
pub type Arguments = Map<String, Value>;

/// Reply used when the decision oracle produced nothing usable.
pub const FALLBACK_REPLY: &str = "I'm having trouble processing that request.";

/// Capability every fallback plan invokes.
pub const REPLY_CAPABILITY: &str = "reply";

/// A single capability invocation decided by the oracle.
///
/// Fields are private so an action cannot change between normalization and
/// dispatch; the dispatcher consumes it with [`Action::into_parts`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    name: String,
    #[serde(default)]
    arguments: Arguments,
}

impl Action {
    /// Creates an action.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Creates a `reply` action carrying `message`.
    #[must_use]
    pub fn reply(message: impl Into<String>) -> Self {
        let mut arguments = Arguments::new();
        arguments.insert("message".into(), Value::String(message.into()));
        Self::new(REPLY_CAPABILITY, arguments)
    }

    /// Capability name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Arguments as decoded.
    #[must_use]
    pub const fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    /// Splits the action into name and arguments.
    #[must_use]
    pub fn into_parts(self) -> (String, Arguments) {
        (self.name, self.arguments)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, Value::Object(self.arguments.clone()))
    }
}

/// Ordered sequence of actions to execute for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    actions: Vec<Action>,
}

impl Plan {
    /// Creates a plan from actions in execution order.
    #[must_use]
    pub fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    /// The deterministic plan used when a decision cannot be understood.
    #[must_use]
    pub fn fallback() -> Self {
        Self::new(vec![Action::reply(FALLBACK_REPLY)])
    }

    /// Number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the plan has no actions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Actions in order.
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Capability names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.actions.iter().map(Action::name).collect()
    }
}

impl IntoIterator for Plan {
    type Item = Action;
    type IntoIter = std::vec::IntoIter<Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.into_iter()
    }
}

impl FromIterator<Action> for Plan {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Result reported by a capability handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the capability achieved its goal.
    pub success: bool,
    /// Short operator-facing status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Structured payload (command output, search hits, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// User-facing sentence; authoritative when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_response: Option<String>,
}

impl ToolResult {
    /// Successful result with a status message.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
            natural_response: None,
        }
    }

    /// Failed result with a status message.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
            natural_response: None,
        }
    }

    /// Attaches the user-facing sentence.
    #[must_use]
    pub fn with_natural_response(mut self, text: impl Into<String>) -> Self {
        self.natural_response = Some(text.into());
        self
    }

    /// Attaches structured data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Text shown to the user for this result on its own.
    #[must_use]
    pub fn reply_text(&self) -> String {
        if let Some(text) = &self.natural_response {
            return text.clone();
        }
        match (&self.message, self.success) {
            (Some(message), _) => message.clone(),
            (None, true) => "Done.".into(),
            (None, false) => "Something went wrong.".into(),
        }
    }

    /// Text contributed to a multi-action reply; empty when the result says
    /// nothing.
    #[must_use]
    pub fn contributed_text(&self) -> &str {
        self.natural_response
            .as_deref()
            .or(self.message.as_deref())
            .unwrap_or_default()
    }
}

impl From<&ActionError> for ToolResult {
    fn from(err: &ActionError) -> Self {
        Self::failure(err.to_string())
    }
}

/// A dispatched action paired with its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Capability name as requested.
    pub name: String,
    /// What the capability (or the dispatcher on its behalf) reported.
    pub result: ToolResult,
    /// Wall time spent on the action.
    pub elapsed_ms: u64,
}

/// Per-action success flag kept for logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSummary {
    /// Capability name.
    pub name: String,
    /// Whether it succeeded.
    pub success: bool,
}

/// Single outcome reduced from every result of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// AND over every result.
    pub success: bool,
    /// Reply text, one line per result for multi-action plans.
    pub combined_output: String,
    /// `multi_action`, the single capability name, or `none`.
    pub label: String,
    /// Outcome of each action in plan order.
    pub per_action: Vec<ActionSummary>,
}

/// Failures the dispatcher converts into failed [`ToolResult`]s.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    /// The oracle named a capability the registry does not have.
    #[error("Unknown function: {0}")]
    UnknownCapability(String),
    /// Arguments did not match the capability schema.
    #[error("Error executing {capability}: {reason}")]
    ArgumentBinding {
        /// Capability name.
        capability: String,
        /// What was wrong with the arguments.
        reason: String,
    },
    /// The handler returned an error or panicked.
    #[error("Error executing {capability}: {cause}")]
    HandlerFault {
        /// Capability name.
        capability: String,
        /// Failure description.
        cause: String,
    },
    /// The handler exceeded the per-action deadline.
    #[error("Error executing {capability}: timed out after {}s", .after.as_secs())]
    Timeout {
        /// Capability name.
        capability: String,
        /// Deadline that expired.
        after: Duration,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_text_prefers_natural_response() {
        let result = ToolResult::success("Saved.").with_natural_response("Got it.");
        assert_eq!(result.reply_text(), "Got it.");
        assert_eq!(ToolResult::success("Saved.").reply_text(), "Saved.");
    }

    #[test]
    fn reply_text_defaults_by_success() {
        let mut ok = ToolResult::success("x");
        ok.message = None;
        let mut failed = ToolResult::failure("x");
        failed.message = None;
        assert_eq!(ok.reply_text(), "Done.");
        assert_eq!(failed.reply_text(), "Something went wrong.");
        assert_eq!(failed.contributed_text(), "");
    }

    #[test]
    fn fallback_plan_replies_with_fixed_message() {
        let plan = Plan::fallback();
        assert_eq!(plan.names(), vec!["reply"]);
        assert_eq!(plan.actions()[0].arguments()["message"], json!(FALLBACK_REPLY));
    }

    #[test]
    fn action_errors_render_user_messages() {
        let unknown = ActionError::UnknownCapability("does_not_exist".into());
        assert_eq!(ToolResult::from(&unknown).reply_text(), "Unknown function: does_not_exist");
        let timeout = ActionError::Timeout {
            capability: "run_command".into(),
            after: Duration::from_secs(30),
        };
        assert_eq!(timeout.to_string(), "Error executing run_command: timed out after 30s");
    }
}
