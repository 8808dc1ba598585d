use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use kuro_server::{bootstrap, config::AssistantConfig, routes::router};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kuro-server", version, about = "Kuro assistant HTTP backend")]
struct Cli {
    /// TOML configuration file (defaults to ./kuro.toml when present).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Listen address, overriding config and KURO_BIND.
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
    /// Validate and print the effective configuration, then exit.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,kuro_server=info,kuro_actions=info")
        }))
        .init();

    let cli = Cli::parse();
    let mut config = AssistantConfig::load(cli.config.as_deref()).context("loading configuration")?;
    config
        .apply_env(|key| std::env::var(key).ok())
        .context("applying environment overrides")?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    config.validate().context("validating configuration")?;

    if cli.check_config {
        let rendered = toml::to_string_pretty(&config).context("rendering configuration")?;
        println!("{rendered}");
        for key in config.missing_secrets() {
            println!("# missing: {key}");
        }
        return Ok(());
    }

    let addr = config.bind_addr()?;
    let state = bootstrap(&config).await.context("starting the assistant")?;
    let app = router(state, &config.server.cors_origins);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "kuro server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;
    tracing::info!("kuro server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
