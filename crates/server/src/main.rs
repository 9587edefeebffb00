//! http-cache server entry point.
//!
//! Loads configuration, wires the caching hooks into the reference proxy engine, and
//! serves the admin tools over MCP on stdio. Logging goes to stderr to avoid interfering
//! with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use httpcache_core::{AppConfig, DEFAULT_RULES, InterceptionController};
use httpcache_proxy::{EngineConfig, HttpProxyEngine};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    tracing::info!(
        cache_dir = %config.cache_dir.display(),
        listen_addr = %config.listen_addr,
        "Starting http-cache server on stdio transport"
    );

    let engine = Arc::new(HttpProxyEngine::new(EngineConfig::from_app_config(&config)?));
    let controller = Arc::new(InterceptionController::new(
        config.key_resolver(),
        config.cache_store(),
        engine.clone(),
    ));

    let rules = match &config.rules_file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read rules file {}", path.display()))?,
        None => DEFAULT_RULES.to_string(),
    };
    controller.reload(&rules)?;

    if config.autostart {
        controller.start().await?;
    }

    let handler = handler::HttpCacheServer::new(controller.clone(), engine);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    let served = server.waiting().await;
    controller.stop().await?;
    served?;

    Ok(())
}
