//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes admin tool calls to the interception controller.
use std::sync::Arc;

use crate::tools::{cache, proxy, rules, rules::RulesReloadParams};

use httpcache_core::InterceptionController;
use httpcache_proxy::HttpProxyEngine;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The main MCP server handler for http-cache.
#[derive(Clone)]
pub struct HttpCacheServer {
    controller: Arc<InterceptionController>,
    engine: Arc<HttpProxyEngine>,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl HttpCacheServer {
    /// Create a new server handler over a controller and the engine it drives.
    pub fn new(controller: Arc<InterceptionController>, engine: Arc<HttpProxyEngine>) -> Self {
        Self { controller, engine, tool_router: Self::tool_router() }
    }

    /// Replace the active cache rules.
    #[tool(
        description = "Replace the cache rules. One rule per line: optional METHOD list (GET|POST) then a URL regex. Returns the number of active filters."
    )]
    async fn rules_reload(&self, params: Parameters<RulesReloadParams>) -> Result<CallToolResult, McpError> {
        rules::reload_impl(&self.controller, params.0).await
    }

    /// Start the proxy with the caching hooks installed.
    #[tool(description = "Start the caching proxy. No-op when already running. Returns proxy status.")]
    async fn proxy_start(&self) -> Result<CallToolResult, McpError> {
        proxy::start_impl(&self.controller, &self.engine).await
    }

    /// Stop the proxy.
    #[tool(description = "Stop the caching proxy. No-op when already stopped. Returns proxy status.")]
    async fn proxy_stop(&self) -> Result<CallToolResult, McpError> {
        proxy::stop_impl(&self.controller, &self.engine).await
    }

    #[tool(description = "Report whether the proxy is running, in-flight exchanges, filter count and cache size.")]
    async fn proxy_status(&self) -> Result<CallToolResult, McpError> {
        proxy::status_impl(&self.controller, &self.engine).await
    }

    /// Delete every cached response.
    #[tool(description = "Delete every cached response. Safe while the proxy is running.")]
    async fn cache_clear(&self) -> Result<CallToolResult, McpError> {
        cache::clear_impl(&self.controller).await
    }
}

impl ServerHandler for HttpCacheServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "http-cache".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
