//! precache-gateway server entry point.
//!
//! Boots the MCP server on stdio transport. Logging goes to stderr to avoid
//! interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

use precache_client::{FetchConfig, HttpNetwork};
use precache_core::{AppConfig, CacheDb};

mod error;
mod handler;
mod state;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    let origin = config.origin_url()?;
    tracing::info!("Starting precache-gateway for {origin} on stdio transport");

    let db = Arc::new(CacheDb::open(&config.db_path).await?);
    let network = Arc::new(HttpNetwork::new(FetchConfig::from(&config))?);
    let state = Arc::new(state::AppState::new(config, origin, db, network));

    let manifest_path = state.config.manifest_path.clone();
    if manifest_path.exists() {
        match state.activate(&manifest_path).await {
            Ok(outcome) => tracing::info!(
                version = outcome.version,
                fetched = outcome.install.fetched.len(),
                failed = outcome.install.failed.len(),
                "startup manifest registered"
            ),
            Err(e) => tracing::warn!("startup manifest {} not registered: {e}", manifest_path.display()),
        }
    } else {
        tracing::info!("no manifest at {}; waiting for gateway_activate", manifest_path.display());
    }

    let handler = handler::PrecacheServer::new(state);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    Ok(())
}
