use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::patterns::{destructive_match, has_safe_prefix};

/// Which command rule set is enforced.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Deny commands containing a destructive pattern.
    #[default]
    Denylist,
    /// Admit only approved prefixes; the denylist still applies.
    Allowlist,
}

impl PolicyMode {
    /// Lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Denylist => "denylist",
            Self::Allowlist => "allowlist",
        }
    }
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PolicyMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "denylist" | "deny" => Ok(Self::Denylist),
            "allowlist" | "allow" => Ok(Self::Allowlist),
            other => Err(format!("unknown command policy '{other}'")),
        }
    }
}

/// Outcome of evaluating a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandDecision {
    /// The command may run.
    Allow,
    /// The command is refused.
    Deny {
        /// Operator-facing reason.
        reason: String,
    },
}

impl CommandDecision {
    /// Whether the command may run.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Global command policy, selected once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandPolicy {
    mode: PolicyMode,
}

impl CommandPolicy {
    /// Creates a policy in the given mode.
    #[must_use]
    pub const fn new(mode: PolicyMode) -> Self {
        Self { mode }
    }

    /// Active mode.
    #[must_use]
    pub const fn mode(&self) -> PolicyMode {
        self.mode
    }

    /// Evaluates a command.
    #[must_use]
    pub fn evaluate(&self, command: &str) -> CommandDecision {
        if command.trim().is_empty() {
            return CommandDecision::Deny {
                reason: "empty command".into(),
            };
        }
        if let Some(pattern) = destructive_match(command) {
            return CommandDecision::Deny {
                reason: format!("matched destructive pattern '{pattern}'"),
            };
        }
        if self.mode == PolicyMode::Allowlist && !has_safe_prefix(command) {
            return CommandDecision::Deny {
                reason: "command not in safe list".into(),
            };
        }
        CommandDecision::Allow
    }
}
