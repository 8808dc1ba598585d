use std::{fmt, sync::Arc};

use async_trait::async_trait;
use indexmap::IndexMap;
use kuro_memory::MemoryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    actions::{Arguments, ToolResult},
    actuator::ActuatorError,
    arguments::ArgumentSchema,
    shell::ShellError,
};

/// How dangerous a capability is; decides whether the safety gate runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RiskClass {
    /// No lasting side effects worth gating.
    Benign,
    /// Cannot be undone once started (power transitions).
    Irreversible,
    /// May destroy data (shell commands, memory deletion).
    Destructive,
}

impl RiskClass {
    /// Lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Benign => "benign",
            Self::Irreversible => "irreversible",
            Self::Destructive => "destructive",
        }
    }
}

/// Static description of a capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    /// Name the oracle uses to invoke the capability.
    pub name: String,
    /// One-line description for prompts and `GET /tools`.
    pub description: String,
    /// Declared parameters.
    pub argument_schema: ArgumentSchema,
    /// Risk classification.
    pub risk_class: RiskClass,
    /// Argument holding shell text subject to the command policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_argument: Option<String>,
    /// Argument naming a program to launch; privileged programs are refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_argument: Option<String>,
}

impl CapabilityDescriptor {
    /// Creates a benign descriptor without parameters.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            argument_schema: ArgumentSchema::new(),
            risk_class: RiskClass::Benign,
            command_argument: None,
            program_argument: None,
        }
    }

    /// Sets the parameter schema.
    #[must_use]
    pub fn schema(mut self, schema: ArgumentSchema) -> Self {
        self.argument_schema = schema;
        self
    }

    /// Sets the risk class.
    #[must_use]
    pub const fn risk(mut self, risk: RiskClass) -> Self {
        self.risk_class = risk;
        self
    }

    /// Marks `argument` as command text checked by the command policy.
    #[must_use]
    pub fn command_argument(mut self, argument: impl Into<String>) -> Self {
        self.command_argument = Some(argument.into());
        self
    }

    /// Marks `argument` as a program name checked against privileged programs.
    #[must_use]
    pub fn program_argument(mut self, argument: impl Into<String>) -> Self {
        self.program_argument = Some(argument.into());
        self
    }
}

/// Errors a handler may return; the dispatcher reports them as
/// `Error executing <name>: <cause>`.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A required argument was absent.
    #[error("missing required argument '{0}'")]
    MissingArgument(String),
    /// An argument had an unusable value.
    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument {
        /// Argument key.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Memory store failure.
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// OS actuator failure.
    #[error(transparent)]
    Actuator(#[from] ActuatorError),
    /// Shell execution failure.
    #[error(transparent)]
    Shell(#[from] ShellError),
    /// Anything else.
    #[error("{0}")]
    Failed(String),
}

/// Executes one capability.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Runs the capability with already-bound arguments.
    async fn invoke(&self, arguments: Arguments) -> Result<ToolResult, HandlerError>;
}

/// Descriptor paired with its handler.
#[derive(Clone)]
pub struct RegisteredCapability {
    descriptor: CapabilityDescriptor,
    handler: Arc<dyn CapabilityHandler>,
}

impl RegisteredCapability {
    /// Static description.
    #[must_use]
    pub const fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    /// Shared handle to the handler.
    #[must_use]
    pub fn handler(&self) -> Arc<dyn CapabilityHandler> {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for RegisteredCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredCapability")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Builder for [`CapabilityRegistry`].
#[derive(Default)]
pub struct CapabilityRegistryBuilder {
    entries: IndexMap<String, RegisteredCapability>,
}

impl CapabilityRegistryBuilder {
    /// Registers a capability. A later registration under the same name
    /// replaces the earlier one.
    #[must_use]
    pub fn register(
        mut self,
        descriptor: CapabilityDescriptor,
        handler: Arc<dyn CapabilityHandler>,
    ) -> Self {
        let name = descriptor.name.clone();
        if self.entries.contains_key(&name) {
            tracing::warn!(capability = %name, "capability registered twice; keeping the latest");
        }
        self.entries
            .insert(name, RegisteredCapability { descriptor, handler });
        self
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> CapabilityRegistry {
        CapabilityRegistry {
            entries: self.entries,
        }
    }
}

/// Immutable name to capability mapping, in registration order.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    entries: IndexMap<String, RegisteredCapability>,
}

impl CapabilityRegistry {
    /// Starts an empty registry builder.
    #[must_use]
    pub fn builder() -> CapabilityRegistryBuilder {
        CapabilityRegistryBuilder::default()
    }

    /// Looks up a capability by exact name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisteredCapability> {
        self.entries.get(name)
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &CapabilityDescriptor> + '_ {
        self.entries.values().map(RegisteredCapability::descriptor)
    }

    /// Registered names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Number of capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arguments::ParamKind;

    struct Echo;

    #[async_trait]
    impl CapabilityHandler for Echo {
        async fn invoke(&self, arguments: Arguments) -> Result<ToolResult, HandlerError> {
            Ok(ToolResult::success(serde_json::Value::Object(arguments).to_string()))
        }
    }

    #[test]
    fn registry_keeps_registration_order_and_latest_entry() {
        let registry = CapabilityRegistry::builder()
            .register(CapabilityDescriptor::new("reply", "first"), Arc::new(Echo))
            .register(
                CapabilityDescriptor::new("run_command", "shell")
                    .risk(RiskClass::Destructive)
                    .command_argument("command")
                    .schema(ArgumentSchema::new().required("command", ParamKind::String, "cmd")),
                Arc::new(Echo),
            )
            .register(CapabilityDescriptor::new("reply", "second"), Arc::new(Echo))
            .build();

        assert_eq!(registry.names(), vec!["reply", "run_command"]);
        assert_eq!(registry.get("reply").unwrap().descriptor().description, "second");
        assert!(!registry.contains("does_not_exist"));
        let shell = registry.get("run_command").unwrap().descriptor();
        assert_eq!(shell.risk_class, RiskClass::Destructive);
        assert_eq!(shell.command_argument.as_deref(), Some("command"));
    }

    #[test]
    fn handler_errors_render_causes() {
        assert_eq!(
            HandlerError::MissingArgument("text".into()).to_string(),
            "missing required argument 'text'"
        );
    }
}
