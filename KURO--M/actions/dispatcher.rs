use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde_json::{json, Value};
use shared_logging::LogLevel;
use tokio::time::timeout;

use crate::{
    actions::{Action, ActionError, ActionOutcome, Plan, ToolResult},
    capabilities::CapabilityRegistry,
    security_link::{SafetyGate, SafetyVerdict},
    telemetry::ActionTelemetry,
};

/// Default per-action deadline.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder used to configure a [`Dispatcher`].
pub struct DispatcherBuilder {
    registry: Arc<CapabilityRegistry>,
    gate: SafetyGate,
    telemetry: Option<ActionTelemetry>,
    action_timeout: Duration,
}

impl DispatcherBuilder {
    /// Overrides the safety gate.
    #[must_use]
    pub const fn gate(mut self, gate: SafetyGate) -> Self {
        self.gate = gate;
        self
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn telemetry(mut self, telemetry: ActionTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Overrides the per-action deadline.
    #[must_use]
    pub const fn action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    /// Finalizes the builder.
    #[must_use]
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            registry: self.registry,
            gate: self.gate,
            telemetry: self.telemetry,
            action_timeout: self.action_timeout,
        }
    }
}

/// Resolves actions against the registry and runs them one at a time.
///
/// Every failure on the way (unknown name, bad arguments, safety denial,
/// handler error, panic or timeout) comes back as a failed [`ToolResult`];
/// dispatch itself never fails.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    gate: SafetyGate,
    telemetry: Option<ActionTelemetry>,
    action_timeout: Duration,
}

impl Dispatcher {
    /// Starts a builder over `registry` with the denylist gate.
    #[must_use]
    pub fn builder(registry: Arc<CapabilityRegistry>) -> DispatcherBuilder {
        DispatcherBuilder {
            registry,
            gate: SafetyGate::default(),
            telemetry: None,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }

    /// Registry in use.
    #[must_use]
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Runs a single action.
    pub async fn dispatch(&self, action: Action) -> ToolResult {
        self.run(action, None).await
    }

    /// Runs a single action on behalf of `request_id`, timing it.
    pub async fn dispatch_traced(&self, request_id: &str, action: Action) -> ActionOutcome {
        let name = action.name().to_string();
        let started = Instant::now();
        let result = self.run(action, Some(request_id)).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.event(
            "dispatch.action",
            json!({
                "request_id": request_id,
                "name": name,
                "success": result.success,
                "elapsed_ms": elapsed_ms,
            }),
        );
        ActionOutcome {
            name,
            result,
            elapsed_ms,
        }
    }

    /// Runs every action of `plan` in order, calling `before_each(index, total)`
    /// before each one starts.
    pub async fn execute_plan<F>(
        &self,
        plan: Plan,
        request_id: &str,
        mut before_each: F,
    ) -> Vec<ActionOutcome>
    where
        F: FnMut(usize, usize) + Send,
    {
        let total = plan.len();
        let mut outcomes = Vec::with_capacity(total);
        for (index, action) in plan.into_iter().enumerate() {
            before_each(index, total);
            outcomes.push(self.dispatch_traced(request_id, action).await);
        }
        outcomes
    }

    async fn run(&self, action: Action, request_id: Option<&str>) -> ToolResult {
        let (name, arguments) = action.into_parts();
        let Some(capability) = self.registry.get(&name) else {
            return self.reject(request_id, &ActionError::UnknownCapability(name));
        };
        let descriptor = capability.descriptor();

        if let SafetyVerdict::Denied { reason, result } = self.gate.check(descriptor, &arguments) {
            self.log(
                LogLevel::Warn,
                request_id,
                "dispatch.action.denied",
                json!({
                    "name": name,
                    "risk_class": descriptor.risk_class.label(),
                    "reason": reason,
                }),
            );
            return result;
        }

        if let Err(reason) = descriptor.argument_schema.bind(&arguments) {
            return self.reject(
                request_id,
                &ActionError::ArgumentBinding {
                    capability: name,
                    reason,
                },
            );
        }

        self.log(
            LogLevel::Debug,
            request_id,
            "dispatch.action.started",
            json!({ "name": name, "risk_class": descriptor.risk_class.label() }),
        );

        let handler = capability.handler();
        let mut task = tokio::spawn(async move { handler.invoke(arguments).await });
        let fault = match timeout(self.action_timeout, &mut task).await {
            Ok(Ok(Ok(result))) => {
                self.log(
                    LogLevel::Info,
                    request_id,
                    "dispatch.action.completed",
                    json!({ "name": name, "success": result.success }),
                );
                return result;
            }
            Ok(Ok(Err(err))) => ActionError::HandlerFault {
                capability: name,
                cause: err.to_string(),
            },
            Ok(Err(join)) => ActionError::HandlerFault {
                capability: name,
                cause: if join.is_panic() {
                    "handler panicked".into()
                } else {
                    "handler was cancelled".into()
                },
            },
            Err(_) => {
                task.abort();
                ActionError::Timeout {
                    capability: name,
                    after: self.action_timeout,
                }
            }
        };
        self.reject(request_id, &fault)
    }

    fn reject(&self, request_id: Option<&str>, err: &ActionError) -> ToolResult {
        let level = match err {
            ActionError::UnknownCapability(_) | ActionError::ArgumentBinding { .. } => LogLevel::Warn,
            ActionError::HandlerFault { .. } | ActionError::Timeout { .. } => LogLevel::Error,
        };
        self.log(
            level,
            request_id,
            "dispatch.action.failed",
            json!({ "error": err.to_string() }),
        );
        ToolResult::from(err)
    }

    fn log(&self, level: LogLevel, request_id: Option<&str>, message: &str, metadata: Value) {
        let Some(tel) = &self.telemetry else {
            return;
        };
        let written = match request_id {
            Some(id) => tel.log_request(level, id, message, metadata),
            None => tel.log(level, message, metadata),
        };
        if let Err(err) = written {
            tracing::warn!(error = %err, "dispatch telemetry write failed");
        }
    }

    fn event(&self, event_type: &str, payload: Value) {
        if let Some(tel) = &self.telemetry {
            if let Err(err) = tel.event(event_type, payload) {
                tracing::warn!(error = %err, "dispatch event publish failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        actions::Arguments,
        arguments::{ArgumentSchema, ParamKind},
        allfunctions::{builtin_registry, BuiltinServices},
        capabilities::{CapabilityDescriptor, CapabilityHandler, HandlerError, RiskClass},
        conversationact::ReplyHandler,
        internetact::HttpPageFetcher,
        offlineact::fakes::{FakeShell, RecordingActuator},
        security::PolicyMode,
    };
    use kuro_memory::InMemoryStore;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CapabilityHandler for Counting {
        async fn invoke(&self, _arguments: Arguments) -> Result<ToolResult, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolResult::success("ran"))
        }
    }

    struct Failing;

    #[async_trait]
    impl CapabilityHandler for Failing {
        async fn invoke(&self, _arguments: Arguments) -> Result<ToolResult, HandlerError> {
            Err(HandlerError::Failed("disk on fire".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl CapabilityHandler for Panicking {
        async fn invoke(&self, _arguments: Arguments) -> Result<ToolResult, HandlerError> {
            panic!("boom");
        }
    }

    struct Sleeping;

    #[async_trait]
    impl CapabilityHandler for Sleeping {
        async fn invoke(&self, _arguments: Arguments) -> Result<ToolResult, HandlerError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolResult::success("late"))
        }
    }

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    fn dispatcher(counting: Arc<Counting>) -> Dispatcher {
        let registry = CapabilityRegistry::builder()
            .register(
                CapabilityDescriptor::new("reply", "reply")
                    .schema(ArgumentSchema::new().required("message", ParamKind::String, "text")),
                Arc::new(ReplyHandler),
            )
            .register(
                CapabilityDescriptor::new("run_command", "shell")
                    .schema(ArgumentSchema::new().required("command", ParamKind::String, "cmd"))
                    .risk(RiskClass::Destructive)
                    .command_argument("command"),
                counting.clone(),
            )
            .register(
                CapabilityDescriptor::new("power_control", "power")
                    .schema(ArgumentSchema::new().required("action", ParamKind::String, "what"))
                    .risk(RiskClass::Irreversible),
                counting,
            )
            .register(CapabilityDescriptor::new("failing", "fails"), Arc::new(Failing))
            .register(CapabilityDescriptor::new("panicking", "panics"), Arc::new(Panicking))
            .register(CapabilityDescriptor::new("sleeping", "sleeps"), Arc::new(Sleeping))
            .build();
        Dispatcher::builder(Arc::new(registry))
            .gate(SafetyGate::builder().policy(PolicyMode::Denylist).build())
            .telemetry(ActionTelemetry::tracing_only("dispatcher"))
            .action_timeout(Duration::from_millis(200))
            .build()
    }

    #[tokio::test]
    async fn unknown_capability_is_reported() {
        let dispatcher = dispatcher(Arc::default());
        let result = dispatcher.dispatch(Action::new("does_not_exist", Arguments::new())).await;
        assert!(!result.success);
        assert_eq!(result.reply_text(), "Unknown function: does_not_exist");
    }

    #[tokio::test]
    async fn missing_required_argument_fails_before_handler() {
        let dispatcher = dispatcher(Arc::default());
        let result = dispatcher.dispatch(Action::new("reply", Arguments::new())).await;
        assert!(!result.success);
        assert_eq!(
            result.reply_text(),
            "Error executing reply: missing required argument 'message'"
        );
    }

    #[tokio::test]
    async fn destructive_command_is_denied_without_running() {
        let counting = Arc::new(Counting::default());
        let dispatcher = dispatcher(counting.clone());
        let denied = dispatcher
            .dispatch(Action::new("run_command", args(json!({ "command": "rm -rf /" }))))
            .await;
        assert!(!denied.success);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);

        let allowed = dispatcher
            .dispatch(Action::new("run_command", args(json!({ "command": "ls" }))))
            .await;
        assert!(allowed.success);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn irreversible_action_needs_confirmation() {
        let counting = Arc::new(Counting::default());
        let dispatcher = dispatcher(counting.clone());
        let denied = dispatcher
            .dispatch(Action::new("power_control", args(json!({ "action": "shutdown" }))))
            .await;
        assert!(!denied.success);
        assert!(denied.reply_text().contains("shut down the computer"));
        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);

        let confirmed = dispatcher
            .dispatch(Action::new(
                "power_control",
                args(json!({ "action": "shutdown", "confirmed": "yes" })),
            ))
            .await;
        assert!(confirmed.success);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_app_refuses_power_programs() {
        let actuator = Arc::new(RecordingActuator::default());
        let services = BuiltinServices::new(
            Arc::new(InMemoryStore::default()),
            Arc::new(FakeShell::default()),
            Arc::new(HttpPageFetcher::new().unwrap()),
        )
        .with_actuator(actuator.clone())
        .with_screenshot_dir(std::env::temp_dir());
        let dispatcher = Dispatcher::builder(Arc::new(builtin_registry(services))).build();

        for app in ["reboot", "/sbin/shutdown", "systemctl", "Poweroff.exe"] {
            let result = dispatcher
                .dispatch(Action::new("open_app", args(json!({ "app_name": app }))))
                .await;
            assert!(!result.success, "{app}");
            assert!(!result.reply_text().contains("Opening"), "{app}");
        }
        assert!(actuator.calls().is_empty());

        let opened = dispatcher
            .dispatch(Action::new("open_app", args(json!({ "app_name": "firefox" }))))
            .await;
        assert!(opened.success);
        assert_eq!(actuator.calls(), vec!["launch:firefox".to_string()]);
    }

    #[tokio::test]
    async fn handler_faults_are_contained() {
        let dispatcher = dispatcher(Arc::default());
        let failed = dispatcher.dispatch(Action::new("failing", Arguments::new())).await;
        assert_eq!(failed.reply_text(), "Error executing failing: disk on fire");

        let panicked = dispatcher.dispatch(Action::new("panicking", Arguments::new())).await;
        assert_eq!(panicked.reply_text(), "Error executing panicking: handler panicked");

        let slow = dispatcher.dispatch(Action::new("sleeping", Arguments::new())).await;
        assert!(!slow.success);
        assert!(slow.reply_text().starts_with("Error executing sleeping: timed out"));
    }

    #[tokio::test]
    async fn plan_runs_in_order() {
        let dispatcher = dispatcher(Arc::default());
        let plan = Plan::new(vec![
            Action::reply("first"),
            Action::new("does_not_exist", Arguments::new()),
            Action::reply("third"),
        ]);
        let mut started = Vec::new();
        let outcomes = dispatcher
            .execute_plan(plan, "req-1", |index, total| started.push((index, total)))
            .await;
        assert_eq!(started, vec![(0, 3), (1, 3), (2, 3)]);
        let names: Vec<_> = outcomes.iter().map(|outcome| outcome.name.as_str()).collect();
        assert_eq!(names, vec!["reply", "does_not_exist", "reply"]);
        assert_eq!(outcomes[0].result.reply_text(), "first");
        assert!(!outcomes[1].result.success);
        assert_eq!(outcomes[2].result.reply_text(), "third");
    }
}
