//! HTTP server binary: wires a [`docforge::Context`] loaded from the
//! environment into an [`docforge::Orchestrator`] and serves the API
//! surface described in the environment-variable table.

use anyhow::{Context as _, Result};
use clap::Parser;
use docforge::context::Context;
use docforge::orchestrator::Orchestrator;
use docforge::server::create_router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// docforge-server: PDF ingestion and structured-extraction API.
#[derive(Parser, Debug)]
#[command(name = "docforge-server", version, about)]
struct Cli {
    /// Bind address (overrides HOST env var).
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,
    /// Bind port (overrides PORT env var).
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    #[cfg(feature = "bundled")]
    pdfium_auto::ensure_pdfium_bundled().context("failed to extract bundled pdfium engine")?;

    let ctx = Context::from_env().await.context("failed to build pipeline context from environment")?;
    let orchestrator = Arc::new(Orchestrator::new(ctx));
    let app = create_router(orchestrator);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", cli.host, cli.port))?;

    tracing::info!(%addr, "docforge-server listening");
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("server exited with an error")?;

    Ok(())
}
