#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

//! HTTP surface of the Kuro assistant.
//!
//! [`bootstrap`] wires configuration into the action pipeline: memory
//! backend, built-in capabilities, safety gate, Gemini oracle and telemetry.
//! [`routes::router`] exposes the result over axum.

use std::{fs, sync::Arc};

use anyhow::{Context, Result};
use kuro_actions::{
    allfunctions::{builtin_registry, BuiltinServices},
    dispatcher::Dispatcher,
    internetact::HttpPageFetcher,
    pipeline::Pipeline,
    security_link::SafetyGate,
    shell::SystemShell,
    telemetry::ActionTelemetry,
};
use kuro_memory::{GeminiEmbedder, InMemoryStore, MemoryStore, PineconeSettings, PineconeStore};
use serde_json::json;
use shared_event_bus::{EventPublisher, FanoutPublisher, FileEventPublisher, MemoryEventBus};
use shared_logging::LogLevel;

/// Layered configuration: TOML file, environment, CLI.
pub mod config;
/// Gemini decision oracle.
pub mod oracle;
/// axum routes and handlers.
pub mod routes;
/// Groq speech synthesis.
pub mod tts;

use config::{AssistantConfig, MemoryBackend};
use oracle::GeminiOracle;
use routes::AppState;
use tts::GroqTts;

/// File under `logging.dir` receiving dispatch and pipeline records.
pub const ACTION_LOG_FILE: &str = "actions.jsonl";

/// Builds every collaborator described by `config`.
///
/// Missing API keys only disable the features that need them; the server
/// still starts.
pub async fn bootstrap(config: &AssistantConfig) -> Result<AppState> {
    for key in config.missing_secrets() {
        tracing::warn!(variable = key, "environment variable not set; dependent features are disabled");
    }

    let telemetry = build_telemetry(config)?;
    let memory = build_memory(config).await?;

    let fetcher = HttpPageFetcher::new().context("building the page fetcher")?;
    let mut services = BuiltinServices::new(
        Arc::clone(&memory),
        Arc::new(SystemShell::new(config.command_timeout())),
        Arc::new(fetcher),
    );
    if let Some(dir) = &config.capabilities.screenshot_dir {
        services = services.with_screenshot_dir(dir);
    }
    let registry = Arc::new(builtin_registry(services));

    let oracle = GeminiOracle::new(&config.oracle, &registry).context("building the Gemini oracle")?;
    let model = oracle.model().to_string();
    let oracle_configured = oracle.is_configured();
    let dispatcher = Dispatcher::builder(Arc::clone(&registry))
        .gate(SafetyGate::builder().policy(config.safety.command_policy).build())
        .telemetry(telemetry.for_module("dispatcher"))
        .action_timeout(config.action_timeout())
        .build();
    let pipeline = Pipeline::builder(dispatcher, Arc::new(oracle))
        .memory(memory)
        .context_top_k(config.memory.context_top_k)
        .context_timeout(config.memory_timeout())
        .oracle_timeout(config.oracle_timeout())
        .telemetry(telemetry.for_module("pipeline"))
        .build();
    let tts = GroqTts::new(&config.tts).context("building the speech client")?;

    telemetry.log(
        LogLevel::Info,
        "server.bootstrap",
        json!({
            "capabilities": registry.names(),
            "memory_backend": config.memory.backend,
            "command_policy": config.safety.command_policy,
            "model": model,
            "oracle_configured": oracle_configured,
        }),
    )?;

    Ok(AppState::new(pipeline, Arc::new(tts)))
}

fn build_telemetry(config: &AssistantConfig) -> Result<ActionTelemetry> {
    let logging = &config.logging;
    fs::create_dir_all(&logging.dir)
        .with_context(|| format!("creating log directory {}", logging.dir.display()))?;

    let mut publisher = FanoutPublisher::new().with_sink(Arc::new(MemoryEventBus::new(logging.event_capacity)));
    if let Some(path) = &logging.event_log {
        let file = FileEventPublisher::new(path)
            .with_context(|| format!("opening event log {}", path.display()))?;
        publisher = publisher.with_sink(Arc::new(file));
    }
    let publisher: Arc<dyn EventPublisher> = Arc::new(publisher);

    ActionTelemetry::builder("kuro")
        .log_path(logging.dir.join(ACTION_LOG_FILE))
        .event_publisher(publisher)
        .build()
        .context("opening the action log")
}

async fn build_memory(config: &AssistantConfig) -> Result<Arc<dyn MemoryStore>> {
    let settings = &config.memory;
    let in_memory = || -> Arc<dyn MemoryStore> { Arc::new(InMemoryStore::new(settings.capacity)) };

    if settings.backend == MemoryBackend::Memory {
        tracing::info!(capacity = settings.capacity, "using in-memory store");
        return Ok(in_memory());
    }
    let (Some(pinecone_key), Some(google_key)) = (&settings.api_key, &config.oracle.api_key) else {
        tracing::warn!("pinecone backend needs PINECONE_API_KEY and GOOGLE_API_KEY; falling back to in-memory store");
        return Ok(in_memory());
    };

    let embedder = GeminiEmbedder::new(google_key.clone(), config.memory_timeout())
        .context("building the Gemini embedder")?;
    let mut pinecone = PineconeSettings::new(pinecone_key.clone(), settings.index_name.clone());
    pinecone.cloud.clone_from(&settings.cloud);
    pinecone.region.clone_from(&settings.region);
    pinecone.timeout = config.memory_timeout();
    let store = PineconeStore::new(pinecone, Arc::new(embedder)).context("building the Pinecone store")?;

    match store.ensure_index().await {
        Ok(host) => tracing::info!(index = %settings.index_name, host, "pinecone index ready"),
        Err(err) => tracing::warn!(index = %settings.index_name, error = %err, "pinecone index not ready; will retry on first use"),
    }
    Ok(Arc::new(store))
}
