use std::{
    fmt,
    path::PathBuf,
    sync::{Arc, OnceLock},
};

use anyhow::{anyhow, Result};
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tokio::{
    runtime::{Builder, Handle},
    sync::mpsc,
};

/// Builder for [`ActionTelemetry`].
pub struct ActionTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl ActionTelemetryBuilder {
    /// Creates the builder for records tagged with `module`.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            event_publisher: None,
        }
    }

    /// Appends JSONL records to `path`.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Publishes events through `publisher`.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<ActionTelemetry> {
        let logger = self.log_path.map(JsonLogger::new).transpose()?.map(Arc::new);
        Ok(ActionTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                events: self.event_publisher.map(|publisher| Arc::new(EventQueue::new(publisher))),
            }),
        })
    }
}

/// Structured log and event sink shared by the dispatcher and pipeline.
///
/// Without a log file, records still reach `tracing`. Inside a tokio runtime,
/// events go through one queue drained by a single task, so they reach the
/// publisher in the order they were emitted across every module sharing the
/// sinks.
#[derive(Clone)]
pub struct ActionTelemetry {
    inner: Arc<TelemetryInner>,
}

struct TelemetryInner {
    module: String,
    logger: Option<Arc<JsonLogger>>,
    events: Option<Arc<EventQueue>>,
}

struct EventQueue {
    publisher: Arc<dyn EventPublisher>,
    sender: OnceLock<mpsc::UnboundedSender<EventRecord>>,
}

impl EventQueue {
    fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            publisher,
            sender: OnceLock::new(),
        }
    }

    /// Starts the draining task on first use.
    fn sender(&self, handle: &Handle) -> &mpsc::UnboundedSender<EventRecord> {
        self.sender.get_or_init(|| {
            let (sender, mut receiver) = mpsc::unbounded_channel::<EventRecord>();
            let publisher = Arc::clone(&self.publisher);
            handle.spawn(async move {
                while let Some(record) = receiver.recv().await {
                    if let Err(err) = publisher.publish(record).await {
                        tracing::warn!(error = %err, "telemetry event publish failed");
                    }
                }
            });
            sender
        })
    }
}

impl fmt::Debug for ActionTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionTelemetry")
            .field("module", &self.inner.module)
            .field("log_file", &self.inner.logger.as_ref().map(|logger| logger.path()))
            .finish_non_exhaustive()
    }
}

impl ActionTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> ActionTelemetryBuilder {
        ActionTelemetryBuilder::new(module)
    }

    /// Telemetry that only mirrors to `tracing`.
    #[must_use]
    pub fn tracing_only(module: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                logger: None,
                events: None,
            }),
        }
    }

    /// Same sinks, different module tag.
    #[must_use]
    pub fn for_module(&self, module: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                logger: self.inner.logger.clone(),
                events: self.inner.events.clone(),
            }),
        }
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        self.write(LogRecord::new(&self.inner.module, level, message).with_metadata(metadata))
    }

    /// Logs structured metadata tagged with a request id.
    pub fn log_request(
        &self,
        level: LogLevel,
        request_id: &str,
        message: &str,
        metadata: Value,
    ) -> Result<()> {
        self.write(
            LogRecord::new(&self.inner.module, level, message)
                .with_request_id(request_id)
                .with_metadata(metadata),
        )
    }

    fn write(&self, record: LogRecord) -> Result<()> {
        match &self.inner.logger {
            Some(logger) => logger.log(&record),
            None => {
                record.mirror_to_tracing();
                Ok(())
            }
        }
    }

    /// Emits an event on the bus.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        let Some(events) = &self.inner.events else {
            return Ok(());
        };
        let record = EventRecord::new(&self.inner.module, event_type, payload);
        if let Ok(handle) = Handle::try_current() {
            events
                .sender(&handle)
                .send(record)
                .map_err(|_| anyhow!("telemetry event queue is closed"))
        } else {
            Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(events.publisher.publish(record))
        }
    }
}
