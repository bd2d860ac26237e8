//! Startup helpers for the TruthLens agent server.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crate::chat::{ChatConfig, ChatEngine};
use crate::server::{self, AppState};

/// Filter from `RUST_LOG` directives when given and valid, else `default`.
#[must_use]
pub fn log_filter(rust_log: Option<&str>, default: &str) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default))
}

/// Filter from the `RUST_LOG` environment variable, else `default`.
#[must_use]
pub fn env_filter_or(default: &str) -> EnvFilter {
    log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(), default)
}

/// Install the global `tracing` subscriber. `RUST_LOG` replaces the default
/// `info` level when set.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter_or("info"))
        .init();
}

/// Build the engine described by `config` and open its conversation
/// subscription.
///
/// # Errors
/// Returns an error if a backend cannot be initialized or the subscription
/// cannot be opened.
pub async fn start_engine(config: ChatConfig) -> anyhow::Result<Arc<ChatEngine>> {
    let engine = ChatEngine::from_config(config)
        .await
        .context("failed to initialize chat engine")?;
    engine
        .start()
        .await
        .context("failed to open conversation subscription")?;
    Ok(Arc::new(engine))
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn serve(config: ChatConfig) -> anyhow::Result<()> {
    let port = config.server.port;
    let engine = start_engine(config).await?;
    let state = AppState::new(Arc::clone(&engine));

    server::run_server_with_shutdown(state, port, shutdown_signal())
        .await
        .context("server error")?;

    engine.shutdown();
    Ok(())
}

/// Run the server (used by the `truthlens-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    init_tracing();

    tracing::info!("Starting TruthLens agent v{}", env!("CARGO_PKG_VERSION"));

    let config = match ChatConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };
    tracing::info!(?config, "Configuration loaded");
    if config.completion.api_key.is_none() {
        tracing::warn!("No completion API key configured; replies will use the fallback text");
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve(config)) {
        tracing::error!("{e:#}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}
