use crate::{
    actions::{Arguments, ToolResult},
    arguments::optional_text,
    capabilities::{CapabilityDescriptor, RiskClass},
    security::{
        confirmation_prompt, is_confirmed, privileged_program, CommandDecision, CommandPolicy,
        PolicyMode,
    },
};

const COMMAND_REFUSAL: &str =
    "Hey, I can't run that command for safety reasons. Let's stick to the safe stuff!";
const PROGRAM_REFUSAL: &str =
    "I can't launch that program. Power and admin tools need a dedicated, confirmed request.";

/// Result of gating one action.
#[derive(Debug, Clone, PartialEq)]
pub enum SafetyVerdict {
    /// The handler may run.
    Allowed,
    /// The handler must not run; `result` is reported instead.
    Denied {
        /// Operator-facing reason.
        reason: String,
        /// Result returned in place of running the handler.
        result: ToolResult,
    },
}

impl SafetyVerdict {
    /// Whether the action may proceed.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Config builder for [`SafetyGate`].
#[derive(Debug, Default)]
pub struct SafetyGateBuilder {
    mode: PolicyMode,
}

impl SafetyGateBuilder {
    /// Selects the command policy.
    #[must_use]
    pub const fn policy(mut self, mode: PolicyMode) -> Self {
        self.mode = mode;
        self
    }

    /// Builds the gate.
    #[must_use]
    pub const fn build(self) -> SafetyGate {
        SafetyGate {
            policy: CommandPolicy::new(self.mode),
        }
    }
}

/// Per-action safety checks run before every handler.
///
/// Program names are refused when they point at a privileged program,
/// whatever the risk class. Irreversible capabilities need `confirmed: true`;
/// capabilities carrying command text go through the global
/// [`CommandPolicy`]. The gate never fails: a denial is an ordinary
/// [`ToolResult`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyGate {
    policy: CommandPolicy,
}

impl SafetyGate {
    /// Builder using the denylist policy.
    #[must_use]
    pub fn builder() -> SafetyGateBuilder {
        SafetyGateBuilder::default()
    }

    /// Active command policy.
    #[must_use]
    pub const fn policy(&self) -> CommandPolicy {
        self.policy
    }

    /// Evaluates an action against its capability descriptor.
    #[must_use]
    pub fn check(&self, descriptor: &CapabilityDescriptor, arguments: &Arguments) -> SafetyVerdict {
        if let Some(verdict) = Self::check_program(descriptor, arguments) {
            return verdict;
        }
        match descriptor.risk_class {
            RiskClass::Benign => SafetyVerdict::Allowed,
            RiskClass::Irreversible => self.check_confirmation(descriptor, arguments),
            RiskClass::Destructive => self.check_command(descriptor, arguments),
        }
    }

    fn check_program(
        descriptor: &CapabilityDescriptor,
        arguments: &Arguments,
    ) -> Option<SafetyVerdict> {
        let argument = descriptor.program_argument.as_deref()?;
        let target = optional_text(arguments, argument)?;
        let program = privileged_program(&target)?;
        Some(SafetyVerdict::Denied {
            reason: format!("{} may not launch privileged program '{program}'", descriptor.name),
            result: ToolResult::failure(format!("Launch blocked by safety policy: {program}"))
                .with_natural_response(PROGRAM_REFUSAL),
        })
    }

    fn check_confirmation(
        &self,
        descriptor: &CapabilityDescriptor,
        arguments: &Arguments,
    ) -> SafetyVerdict {
        if is_confirmed(arguments) {
            return self.check_command(descriptor, arguments);
        }
        let what = optional_text(arguments, "action").map_or_else(
            || format!("run {}", descriptor.name),
            |action| describe_power_action(&action),
        );
        SafetyVerdict::Denied {
            reason: format!("{} requires confirmation", descriptor.name),
            result: ToolResult::failure(format!("Confirmation required for {}", descriptor.name))
                .with_natural_response(confirmation_prompt(&what)),
        }
    }

    fn check_command(
        &self,
        descriptor: &CapabilityDescriptor,
        arguments: &Arguments,
    ) -> SafetyVerdict {
        let Some(argument) = descriptor.command_argument.as_deref() else {
            return SafetyVerdict::Allowed;
        };
        let command = optional_text(arguments, argument).unwrap_or_default();
        match self.policy.evaluate(&command) {
            CommandDecision::Allow => SafetyVerdict::Allowed,
            CommandDecision::Deny { reason } => SafetyVerdict::Denied {
                result: ToolResult::failure(format!("Command blocked by safety policy: {reason}"))
                    .with_natural_response(COMMAND_REFUSAL),
                reason,
            },
        }
    }
}

fn describe_power_action(action: &str) -> String {
    match action.to_ascii_lowercase().as_str() {
        "shutdown" | "shut down" | "poweroff" | "power off" => "shut down the computer".into(),
        "restart" | "reboot" => "restart the computer".into(),
        other => format!("{other} the computer"),
    }
}
