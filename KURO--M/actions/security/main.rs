//! Command policy and confirmation rules used by the safety gate.

/// Confirmation markers for irreversible capabilities.
pub mod confirmation;
/// Destructive patterns, privileged programs and approved command prefixes.
pub mod patterns;
/// Denylist/allowlist command policy.
pub mod policy;

pub use confirmation::{confirmation_prompt, is_confirmed, CONFIRMATION_ARGUMENT};
pub use patterns::{
    destructive_match, has_safe_prefix, privileged_program, DESTRUCTIVE_PATTERNS,
    PRIVILEGED_PROGRAMS, SAFE_PREFIXES,
};
pub use policy::{CommandDecision, CommandPolicy, PolicyMode};
