//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use std::sync::Arc;

use crate::state::AppState;
use crate::tools::{
    activate::{GatewayActivateParams, activate_impl},
    cache::{CacheListParams, CachePurgeParams, list_impl, purge_impl},
    fetch::{GatewayFetchParams, fetch_impl},
};

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

/// The main MCP server handler for the precache gateway.
#[derive(Clone)]
pub struct PrecacheServer {
    state: Arc<AppState>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl PrecacheServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state, tool_router: Self::tool_router() }
    }

    /// Dispatch one request through the active gateway version.
    #[tool(
        description = "Request a URL through the precache gateway. Returns status, source (precache, cache, network, passthrough), revision, and body."
    )]
    async fn gateway_fetch(&self, params: Parameters<GatewayFetchParams>) -> Result<CallToolResult, McpError> {
        fetch_impl(&self.state, params.0).await
    }

    /// Register a site manifest as a new gateway version.
    #[tool(
        description = "Load a site manifest and register it as a new gateway version. Returns the install report and lifecycle state."
    )]
    async fn gateway_activate(&self, params: Parameters<GatewayActivateParams>) -> Result<CallToolResult, McpError> {
        activate_impl(&self.state, params.0).await
    }

    #[tool(description = "List URLs stored in a cache (precache, runtime, or a full cache name).")]
    async fn cache_list(&self, params: Parameters<CacheListParams>) -> Result<CallToolResult, McpError> {
        list_impl(&self.state, params.0).await
    }

    #[tool(description = "Delete one URL from a cache, or empty the cache when no URL is given.")]
    async fn cache_purge(&self, params: Parameters<CachePurgeParams>) -> Result<CallToolResult, McpError> {
        purge_impl(&self.state, params.0).await
    }
}

impl ServerHandler for PrecacheServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "precache-gateway".into(),
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
