use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use kuro_memory::{MemoryItem, MemoryStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_logging::LogLevel;
use thiserror::Error;
use tokio::time::timeout;
use uuid::Uuid;

use crate::{
    aggregator::{aggregate, NO_ACTION_LABEL},
    dispatcher::Dispatcher,
    normalizer::{normalize, RawDecision},
    telemetry::ActionTelemetry,
};

/// Reply sent when the oracle reports a quota or rate limit.
pub const QUOTA_REPLY: &str = "I've hit my usage limit with the AI service (quota/rate limit exceeded). Please wait a minute and try again.";

/// Reply sent when the oracle cannot be reached.
pub const UNAVAILABLE_REPLY: &str = "Something went wrong. Please try again.";

/// Memories fetched as context for each request.
pub const DEFAULT_CONTEXT_TOP_K: usize = 3;

/// Failures reported by a [`DecisionOracle`].
#[derive(Debug, Error)]
pub enum OracleError {
    /// Quota or rate limit exhausted.
    #[error("oracle quota exceeded: {0}")]
    QuotaExceeded(String),
    /// Transport failure or unusable response.
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
    /// No credentials were configured.
    #[error("oracle is not configured")]
    NotConfigured,
}

/// Turns an utterance plus retrieved memories into a raw decision.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Asks the model which capabilities to run.
    async fn decide(&self, utterance: &str, context: &[MemoryItem]) -> Result<RawDecision, OracleError>;
}

/// Request-level failures.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Blank message; rejected before any work.
    #[error("message must not be empty")]
    EmptyUtterance,
    /// Oracle quota exhausted; nothing was dispatched.
    #[error("decision oracle quota exceeded")]
    QuotaExceeded,
    /// Oracle unreachable or timed out; nothing was dispatched.
    #[error("decision oracle unavailable")]
    OracleUnavailable,
}

impl PipelineError {
    /// Friendly text returned to the user.
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::EmptyUtterance => "Please say something first.",
            Self::QuotaExceeded => QUOTA_REPLY,
            Self::OracleUnavailable => UNAVAILABLE_REPLY,
        }
    }

    /// Snake-case label for logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::EmptyUtterance => "empty_utterance",
            Self::QuotaExceeded => "quota_exceeded",
            Self::OracleUnavailable => "oracle_unavailable",
        }
    }
}

impl From<&OracleError> for PipelineError {
    fn from(err: &OracleError) -> Self {
        match err {
            OracleError::QuotaExceeded(_) => Self::QuotaExceeded,
            OracleError::Unavailable(_) | OracleError::NotConfigured => Self::OracleUnavailable,
        }
    }
}

/// Request lifecycle position, published as `pipeline.stage` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Stage {
    /// Utterance accepted.
    ReceivingRequest,
    /// Fetching memories for context.
    RetrievingContext,
    /// Waiting on the oracle.
    RequestingDecision,
    /// Turning the raw decision into a plan.
    Normalizing,
    /// Running action `index` of `total`.
    Dispatching {
        /// Zero-based position in the plan.
        index: usize,
        /// Plan length.
        total: usize,
    },
    /// Reducing results.
    Aggregating,
    /// Reply ready.
    Responding,
    /// Aborted before dispatch.
    Failed {
        /// Failure label.
        reason: &'static str,
    },
}

impl Stage {
    /// Snake-case stage name.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ReceivingRequest => "receiving_request",
            Self::RetrievingContext => "retrieving_context",
            Self::RequestingDecision => "requesting_decision",
            Self::Normalizing => "normalizing",
            Self::Dispatching { .. } => "dispatching",
            Self::Aggregating => "aggregating",
            Self::Responding => "responding",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Response body of `POST /assistant`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantReply {
    /// Text for the user.
    pub reply: String,
    /// Capability label: a name, `multi_action` or `none`.
    pub function_called: String,
    /// Overall success.
    pub success: bool,
    /// Correlation id used in logs and events.
    #[serde(skip)]
    pub request_id: String,
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    dispatcher: Dispatcher,
    oracle: Arc<dyn DecisionOracle>,
    memory: Option<Arc<dyn MemoryStore>>,
    context_top_k: usize,
    context_timeout: Duration,
    oracle_timeout: Duration,
    telemetry: Option<ActionTelemetry>,
}

impl PipelineBuilder {
    /// Store consulted for context memories.
    #[must_use]
    pub fn memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Number of context memories.
    #[must_use]
    pub const fn context_top_k(mut self, top_k: usize) -> Self {
        self.context_top_k = top_k;
        self
    }

    /// Deadline for context retrieval.
    #[must_use]
    pub const fn context_timeout(mut self, timeout: Duration) -> Self {
        self.context_timeout = timeout;
        self
    }

    /// Deadline for the oracle call.
    #[must_use]
    pub const fn oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = timeout;
        self
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn telemetry(mut self, telemetry: ActionTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Finalizes the builder.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            dispatcher: self.dispatcher,
            oracle: self.oracle,
            memory: self.memory,
            context_top_k: self.context_top_k,
            context_timeout: self.context_timeout,
            oracle_timeout: self.oracle_timeout,
            telemetry: self.telemetry,
        }
    }
}

/// Drives one utterance from context retrieval to the aggregated reply.
#[derive(Clone)]
pub struct Pipeline {
    dispatcher: Dispatcher,
    oracle: Arc<dyn DecisionOracle>,
    memory: Option<Arc<dyn MemoryStore>>,
    context_top_k: usize,
    context_timeout: Duration,
    oracle_timeout: Duration,
    telemetry: Option<ActionTelemetry>,
}

impl Pipeline {
    /// Starts a builder.
    #[must_use]
    pub fn builder(dispatcher: Dispatcher, oracle: Arc<dyn DecisionOracle>) -> PipelineBuilder {
        PipelineBuilder {
            dispatcher,
            oracle,
            memory: None,
            context_top_k: DEFAULT_CONTEXT_TOP_K,
            context_timeout: Duration::from_secs(10),
            oracle_timeout: Duration::from_secs(20),
            telemetry: None,
        }
    }

    /// Dispatcher used for plans.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Runs the request, surfacing oracle failures as errors.
    pub async fn run(&self, utterance: &str) -> Result<AssistantReply, PipelineError> {
        let request_id = Uuid::new_v4().to_string();
        self.run_with_id(utterance, &request_id).await
    }

    /// Runs the request and turns oracle failures into a failed reply.
    ///
    /// Only [`PipelineError::EmptyUtterance`] is returned as an error.
    pub async fn handle(&self, utterance: &str) -> Result<AssistantReply, PipelineError> {
        let request_id = Uuid::new_v4().to_string();
        match self.run_with_id(utterance, &request_id).await {
            Err(PipelineError::EmptyUtterance) => Err(PipelineError::EmptyUtterance),
            Err(err) => Ok(AssistantReply {
                reply: err.user_message().into(),
                function_called: NO_ACTION_LABEL.into(),
                success: false,
                request_id,
            }),
            ok => ok,
        }
    }

    async fn run_with_id(
        &self,
        utterance: &str,
        request_id: &str,
    ) -> Result<AssistantReply, PipelineError> {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Err(PipelineError::EmptyUtterance);
        }

        self.stage(request_id, Stage::ReceivingRequest);
        self.log(
            LogLevel::Info,
            request_id,
            "pipeline.request.received",
            json!({ "chars": utterance.chars().count() }),
        );

        self.stage(request_id, Stage::RetrievingContext);
        let context = self.retrieve_context(request_id, utterance).await;

        self.stage(request_id, Stage::RequestingDecision);
        let raw = match timeout(self.oracle_timeout, self.oracle.decide(utterance, &context)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => return Err(self.fail(request_id, PipelineError::from(&err), &err.to_string())),
            Err(_) => {
                let detail = format!("oracle timed out after {}s", self.oracle_timeout.as_secs());
                return Err(self.fail(request_id, PipelineError::OracleUnavailable, &detail));
            }
        };

        self.stage(request_id, Stage::Normalizing);
        let plan = normalize(raw);
        self.log(
            LogLevel::Info,
            request_id,
            "pipeline.plan.normalized",
            json!({ "actions": plan.names() }),
        );

        let outcomes = self
            .dispatcher
            .execute_plan(plan, request_id, |index, total| {
                self.stage(request_id, Stage::Dispatching { index, total });
            })
            .await;

        self.stage(request_id, Stage::Aggregating);
        let aggregate = aggregate(outcomes);

        self.stage(request_id, Stage::Responding);
        self.log(
            if aggregate.success { LogLevel::Info } else { LogLevel::Warn },
            request_id,
            "pipeline.request.completed",
            json!({
                "label": aggregate.label,
                "success": aggregate.success,
                "per_action": aggregate.per_action,
            }),
        );

        Ok(AssistantReply {
            reply: aggregate.combined_output,
            function_called: aggregate.label,
            success: aggregate.success,
            request_id: request_id.to_string(),
        })
    }

    async fn retrieve_context(&self, request_id: &str, utterance: &str) -> Vec<MemoryItem> {
        let Some(memory) = &self.memory else {
            return Vec::new();
        };
        let degraded = match timeout(
            self.context_timeout,
            memory.retrieve(utterance, self.context_top_k),
        )
        .await
        {
            Ok(Ok(mut items)) => {
                items.truncate(self.context_top_k);
                return items;
            }
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!("retrieval timed out after {}s", self.context_timeout.as_secs()),
        };
        self.log(
            LogLevel::Warn,
            request_id,
            "pipeline.context.degraded",
            json!({ "backend": memory.backend(), "error": degraded }),
        );
        Vec::new()
    }

    fn fail(&self, request_id: &str, err: PipelineError, detail: &str) -> PipelineError {
        self.stage(request_id, Stage::Failed { reason: err.label() });
        self.log(
            LogLevel::Error,
            request_id,
            "pipeline.request.failed",
            json!({ "error": err.label(), "detail": detail }),
        );
        err
    }

    fn stage(&self, request_id: &str, stage: Stage) {
        self.log(LogLevel::Debug, request_id, "pipeline.stage", json!({ "stage": stage }));
        if let Some(tel) = &self.telemetry {
            if let Err(err) = tel.event(
                "pipeline.stage",
                json!({ "request_id": request_id, "stage": stage }),
            ) {
                tracing::warn!(error = %err, "stage event publish failed");
            }
        }
    }

    fn log(&self, level: LogLevel, request_id: &str, message: &str, metadata: Value) {
        if let Some(tel) = &self.telemetry {
            if let Err(err) = tel.log_request(level, request_id, message, metadata) {
                tracing::warn!(error = %err, "pipeline telemetry write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use kuro_memory::{InMemoryStore, MemoryError, MemoryMetadata};
    use parking_lot::Mutex;
    use shared_event_bus::MemoryEventBus;

    use super::*;
    use crate::{
        actions::FALLBACK_REPLY,
        allfunctions::{builtin_registry, BuiltinServices},
        internetact::{FetchError, PageFetcher},
        offlineact::fakes::{FakeShell, RecordingActuator},
    };

    /// Replays a scripted oracle answer and records what it was shown.
    struct FakeOracle {
        answer: Box<dyn Fn() -> Result<RawDecision, OracleError> + Send + Sync>,
        calls: AtomicUsize,
        seen_context: Mutex<Vec<String>>,
    }

    impl FakeOracle {
        fn text(text: &'static str) -> Self {
            Self::with(move || Ok(RawDecision::from_text(text)))
        }

        fn with(answer: impl Fn() -> Result<RawDecision, OracleError> + Send + Sync + 'static) -> Self {
            Self {
                answer: Box::new(answer),
                calls: AtomicUsize::new(0),
                seen_context: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DecisionOracle for FakeOracle {
        async fn decide(
            &self,
            _utterance: &str,
            context: &[MemoryItem],
        ) -> Result<RawDecision, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_context.lock() = context.iter().map(|item| item.content.clone()).collect();
            (self.answer)()
        }
    }

    struct SlowOracle;

    #[async_trait]
    impl DecisionOracle for SlowOracle {
        async fn decide(&self, _: &str, _: &[MemoryItem]) -> Result<RawDecision, OracleError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(RawDecision::from_text("[]"))
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl MemoryStore for BrokenStore {
        async fn retrieve(&self, _: &str, _: usize) -> Result<Vec<MemoryItem>, MemoryError> {
            Err(MemoryError::Transport("connection refused".into()))
        }

        async fn upsert(&self, _: &str, _: MemoryMetadata) -> Result<String, MemoryError> {
            Err(MemoryError::Transport("connection refused".into()))
        }

        async fn delete(&self, _: &str) -> Result<(), MemoryError> {
            Err(MemoryError::Transport("connection refused".into()))
        }

        fn backend(&self) -> &'static str {
            "broken"
        }
    }

    struct NoPages;

    #[async_trait]
    impl PageFetcher for NoPages {
        async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
            Err(FetchError::Status(404))
        }
    }

    struct Harness {
        pipeline: Pipeline,
        actuator: Arc<RecordingActuator>,
        store: Arc<InMemoryStore>,
        bus: Arc<MemoryEventBus>,
    }

    fn harness(oracle: Arc<dyn DecisionOracle>) -> Harness {
        let store = Arc::new(InMemoryStore::default());
        let actuator = Arc::new(RecordingActuator::default());
        let bus = Arc::new(MemoryEventBus::new(256));
        let telemetry = ActionTelemetry::builder("pipeline")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let services = BuiltinServices::new(store.clone(), Arc::new(FakeShell::printing("ok")), Arc::new(NoPages))
            .with_actuator(actuator.clone())
            .with_screenshot_dir(std::env::temp_dir());
        let dispatcher = Dispatcher::builder(Arc::new(builtin_registry(services)))
            .telemetry(telemetry.for_module("dispatcher"))
            .build();
        let pipeline = Pipeline::builder(dispatcher, oracle)
            .memory(store.clone())
            .oracle_timeout(Duration::from_millis(200))
            .telemetry(telemetry)
            .build();
        Harness {
            pipeline,
            actuator,
            store,
            bus,
        }
    }

    #[tokio::test]
    async fn empty_utterance_is_rejected() {
        let oracle = Arc::new(FakeOracle::text("[]"));
        let h = harness(oracle.clone());
        assert_eq!(h.pipeline.handle("   ").await, Err(PipelineError::EmptyUtterance));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remember_request_saves_memory() {
        let oracle = Arc::new(FakeOracle::text(
            r#"{"function": "save_memory", "arguments": {"text": "User likes coffee", "importance": "high", "category": "preference"}}"#,
        ));
        let h = harness(oracle);
        let reply = h.pipeline.handle("remember that I like coffee").await.unwrap();
        assert!(reply.success);
        assert_eq!(reply.function_called, "save_memory");
        assert_eq!(reply.reply, "Got it. I'll remember that.");
        assert_eq!(h.store.contents(), vec!["User likes coffee".to_string()]);
    }

    #[tokio::test]
    async fn unconfirmed_shutdown_asks_first() {
        let oracle = Arc::new(FakeOracle::text(
            r#"{"function": "power_control", "arguments": {"action": "shutdown"}}"#,
        ));
        let h = harness(oracle);
        let reply = h.pipeline.handle("shut down the computer").await.unwrap();
        assert!(!reply.success);
        assert_eq!(reply.function_called, "power_control");
        assert!(reply.reply.contains("Are you sure you want me to shut down the computer?"));
        assert!(h.actuator.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_capability_reports_name() {
        let h = harness(Arc::new(FakeOracle::text(r#"{"function": "does_not_exist"}"#)));
        let reply = h.pipeline.handle("do something odd").await.unwrap();
        assert!(!reply.success);
        assert_eq!(reply.reply, "Unknown function: does_not_exist");
        assert_eq!(reply.function_called, "does_not_exist");
    }

    #[tokio::test]
    async fn malformed_oracle_output_still_replies() {
        for text in ["", "not json at all", "42", r#"{"arguments": {}}"#] {
            let h = harness(Arc::new(FakeOracle::with(move || Ok(RawDecision::from_text(text)))));
            let reply = h.pipeline.handle("hello").await.unwrap();
            assert_eq!(reply.reply, FALLBACK_REPLY);
            assert_eq!(reply.function_called, "reply");
        }
    }

    #[tokio::test]
    async fn empty_action_list_reports_trouble() {
        let h = harness(Arc::new(FakeOracle::text("[]")));
        let reply = h.pipeline.handle("hello").await.unwrap();
        assert!(!reply.success);
        assert_eq!(reply.function_called, "none");
        assert!(!reply.reply.is_empty());
    }

    #[tokio::test]
    async fn multi_action_plan_preserves_order() {
        let h = harness(Arc::new(FakeOracle::text(
            r#"[{"function": "open_app", "arguments": {"app_name": "notepad"}},
                {"function": "run_command", "arguments": {"command": "rm -rf /"}},
                {"function": "reply", "arguments": {"message": "All set."}}]"#,
        )));
        let reply = h.pipeline.handle("open notepad and wipe the disk").await.unwrap();
        assert!(!reply.success);
        assert_eq!(reply.function_called, "multi_action");
        let lines: Vec<_> = reply.reply.lines().collect();
        assert_eq!(lines[0], "Sure thing! Opening notepad for you.");
        assert!(lines[1].contains("safety reasons"));
        assert_eq!(lines[2], "All set.");
        assert_eq!(h.actuator.calls(), vec!["launch:notepad".to_string()]);
    }

    #[tokio::test]
    async fn quota_failure_stops_before_dispatch() {
        let oracle = Arc::new(FakeOracle::with(|| {
            Err(OracleError::QuotaExceeded("429 RESOURCE_EXHAUSTED".into()))
        }));
        let h = harness(oracle);
        assert_eq!(h.pipeline.run("open notepad").await, Err(PipelineError::QuotaExceeded));
        let reply = h.pipeline.handle("open notepad").await.unwrap();
        assert!(!reply.success);
        assert_eq!(reply.reply, QUOTA_REPLY);
        assert_eq!(reply.function_called, "none");
        assert!(h.actuator.calls().is_empty());
    }

    #[tokio::test]
    async fn oracle_timeout_is_unavailable() {
        let h = harness(Arc::new(SlowOracle));
        let reply = h.pipeline.handle("hello").await.unwrap();
        assert!(!reply.success);
        assert_eq!(reply.reply, UNAVAILABLE_REPLY);
    }

    #[tokio::test]
    async fn context_memories_reach_the_oracle() {
        let oracle = Arc::new(FakeOracle::text(r#"{"function": "reply", "arguments": {"message": "hi"}}"#));
        let h = harness(oracle.clone());
        for fact in ["I like coffee", "I like tea", "I like rust", "I like jazz"] {
            h.store.upsert(fact, MemoryMetadata::new()).await.unwrap();
        }
        h.pipeline.handle("what do I like").await.unwrap();
        assert_eq!(oracle.seen_context.lock().len(), DEFAULT_CONTEXT_TOP_K);
    }

    #[tokio::test]
    async fn broken_memory_degrades_to_empty_context() {
        let oracle = Arc::new(FakeOracle::text(r#"{"function": "reply", "arguments": {"message": "hi"}}"#));
        let registry = Arc::new(crate::capabilities::CapabilityRegistry::builder()
            .register(
                crate::capabilities::CapabilityDescriptor::new("reply", "reply"),
                Arc::new(crate::conversationact::ReplyHandler),
            )
            .build());
        let pipeline = Pipeline::builder(Dispatcher::builder(registry).build(), oracle.clone())
            .memory(Arc::new(BrokenStore))
            .build();
        let reply = pipeline.handle("hello").await.unwrap();
        assert!(reply.success);
        assert_eq!(reply.reply, "hi");
        assert!(oracle.seen_context.lock().is_empty());
    }

    #[tokio::test]
    async fn stage_events_carry_request_id() {
        let h = harness(Arc::new(FakeOracle::text(
            r#"[{"function": "tell_joke"}, {"function": "reply", "arguments": {"message": "ha"}}]"#,
        )));
        let reply = h.pipeline.handle("tell me a joke").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stages: Vec<Value> = h
            .bus
            .snapshot_of("pipeline.stage")
            .into_iter()
            .map(|event| event.payload)
            .collect();
        assert_eq!(stages.len(), 8);
        assert!(stages.iter().all(|payload| payload["request_id"] == reply.request_id.as_str()));
        let names: Vec<_> = stages
            .iter()
            .filter_map(|payload| payload["stage"]["name"].as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "receiving_request",
                "retrieving_context",
                "requesting_decision",
                "normalizing",
                "dispatching",
                "dispatching",
                "aggregating",
                "responding",
            ]
        );
        let dispatching: Vec<_> = stages
            .iter()
            .filter(|payload| payload["stage"]["name"] == "dispatching")
            .map(|payload| payload["stage"]["total"].clone())
            .collect();
        assert_eq!(dispatching, vec![json!(2), json!(2)]);
        assert_eq!(h.bus.snapshot_of("dispatch.action").len(), 2);
    }
}
