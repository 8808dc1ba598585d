#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

//! Kuro assistant action orchestration: turns an oracle decision into
//! capability invocations behind a safety gate and reduces their results
//! into one reply.

/// Actions, plans, tool results and dispatch errors.
#[path = "../actions.rs"]
pub mod actions;

/// Argument schemas and typed accessors.
#[path = "../arguments.rs"]
pub mod arguments;

/// Capability descriptors, handlers and the registry.
#[path = "../capabilities.rs"]
pub mod capabilities;

/// Oracle output decoding into plans.
#[path = "../normalizer.rs"]
pub mod normalizer;

/// Command policy and confirmation rules.
#[path = "../security/main.rs"]
pub mod security;

/// Per-action safety gate.
#[path = "../security_link.rs"]
pub mod security_link;

/// Registry lookup, gating and contained handler execution.
#[path = "../dispatcher.rs"]
pub mod dispatcher;

/// Reduction of per-action results.
#[path = "../aggregator.rs"]
pub mod aggregator;

/// Request state machine from utterance to reply.
#[path = "../pipeline.rs"]
pub mod pipeline;

/// Structured logs and events for dispatch and the pipeline.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// OS side effects behind a trait.
#[path = "../actuator.rs"]
pub mod actuator;

/// Shell execution with a hard deadline.
#[path = "../shell.rs"]
pub mod shell;

/// Browser and web page capabilities.
#[path = "../internetact.rs"]
pub mod internetact;

/// Local machine capabilities.
#[path = "../offlineact.rs"]
pub mod offlineact;

/// Memory capabilities.
#[path = "../memoryact.rs"]
pub mod memoryact;

/// Conversational capabilities.
#[path = "../conversationact.rs"]
pub mod conversationact;

/// Built-in capability wiring.
#[path = "../allfunctions.rs"]
pub mod allfunctions;

/// Prelude exports for embedding the pipeline.
pub mod prelude {
    pub use crate::actions::{
        Action, ActionError, ActionOutcome, AggregateResult, Arguments, Plan, ToolResult,
    };
    pub use crate::allfunctions::{builtin_registry, BuiltinServices};
    pub use crate::capabilities::{
        CapabilityDescriptor, CapabilityHandler, CapabilityRegistry, HandlerError, RiskClass,
    };
    pub use crate::dispatcher::{Dispatcher, DispatcherBuilder};
    pub use crate::normalizer::{normalize, RawDecision};
    pub use crate::pipeline::{
        AssistantReply, DecisionOracle, OracleError, Pipeline, PipelineBuilder, PipelineError,
    };
    pub use crate::security::PolicyMode;
    pub use crate::security_link::{SafetyGate, SafetyGateBuilder};
    pub use crate::telemetry::{ActionTelemetry, ActionTelemetryBuilder};
}
