//! waystation server entry point.
//!
//! Boots the engine from configuration and serves its events as MCP tools on
//! stdio. Logging goes to stderr to avoid interfering with the JSON-RPC
//! protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;
use waystation_client::{FetchConfig, HttpNetwork};
use waystation_core::{AppConfig, CacheDb};
use waystation_engine::{Engine, InMemoryWindows, LogPresenter};

mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(origin = %config.origin, db = %config.db_path.display(), "starting waystation on stdio transport");

    let db = CacheDb::open(&config.db_path).await?;
    let network = Arc::new(HttpNetwork::new(FetchConfig::from(&config))?);
    let engine = Arc::new(Engine::new(
        config,
        db,
        network,
        Arc::new(LogPresenter),
        Arc::new(InMemoryWindows::new()),
    )?);

    // A failed install leaves the engine passing requests through; the next
    // start retries it.
    if let Err(e) = engine.on_install().await {
        tracing::warn!(error = %e, "install did not complete");
    }
    engine.start().await;

    let handler = handler::WaystationServer::new(engine.clone());
    let server = serve_server(handler, stdio()).await?;
    server.waiting().await?;

    engine.shutdown().await;
    Ok(())
}
