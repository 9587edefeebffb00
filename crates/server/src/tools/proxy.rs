//! proxy_start, proxy_stop and proxy_status tool implementations.

use std::net::SocketAddr;

use httpcache_core::InterceptionController;
use httpcache_proxy::HttpProxyEngine;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;

/// Output shared by the proxy lifecycle tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProxyStatusOutput {
    /// Whether the hooks are installed and the engine is running.
    pub active: bool,

    /// Address the proxy is bound to, when running.
    pub listen_addr: Option<String>,

    /// Exchanges that entered the before-request hook and have not completed.
    pub in_flight: i64,

    /// Number of active filters.
    pub filters: usize,

    /// Directory holding cache entries.
    pub cache_dir: String,

    /// Number of entries currently on disk.
    pub cached_entries: usize,
}

impl ProxyStatusOutput {
    fn collect(controller: &InterceptionController, listen_addr: Option<SocketAddr>) -> Self {
        Self {
            active: controller.is_active(),
            listen_addr: listen_addr.map(|a| a.to_string()),
            in_flight: controller.in_flight(),
            filters: controller.filter_count(),
            cache_dir: controller.store().root_path().display().to_string(),
            cached_entries: controller.store().entry_count(),
        }
    }
}

/// Implementation of the proxy_start tool.
pub async fn start_impl(
    controller: &InterceptionController, engine: &HttpProxyEngine,
) -> Result<CallToolResult, McpError> {
    controller.start().await?;
    status_impl(controller, engine).await
}

/// Implementation of the proxy_stop tool.
pub async fn stop_impl(
    controller: &InterceptionController, engine: &HttpProxyEngine,
) -> Result<CallToolResult, McpError> {
    controller.stop().await?;
    status_impl(controller, engine).await
}

/// Implementation of the proxy_status tool.
pub async fn status_impl(
    controller: &InterceptionController, engine: &HttpProxyEngine,
) -> Result<CallToolResult, McpError> {
    let status = ProxyStatusOutput::collect(controller, engine.local_addr().await);
    json_result(&status)
}
