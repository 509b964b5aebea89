//! gateway_fetch tool implementation.
//!
//! Opens a page, dispatches one request through it, and closes the page.
//! A promotion failing on close does not fail the fetch.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use precache_client::{Method, Request, fetch::resolve};

use crate::error::ToolError;
use crate::state::AppState;
use crate::tools::json_result;

/// Input parameters for gateway_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GatewayFetchParams {
    /// URL to request; relative URLs resolve against the gateway origin.
    pub url: String,

    /// HTTP method (default: GET).
    #[serde(default)]
    pub method: Option<String>,
}

/// Output structure for gateway_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GatewayFetchOutput {
    pub url: String,
    pub status: u16,
    /// One of `precache`, `cache`, `network`, `passthrough`.
    pub source: String,
    /// Manifest revision when served from the precache.
    pub revision: Option<String>,
    pub content_type: Option<String>,
    /// Gateway version that served the request, if the page was controlled.
    pub version: Option<u64>,
    /// Body decoded as UTF-8 (lossy).
    pub body: String,
}

fn parse_method(method: Option<&str>) -> Result<Method, ToolError> {
    match method {
        None => Ok(Method::GET),
        Some(m) => Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| ToolError::InvalidInput(format!("unsupported method: {m}"))),
    }
}

/// Implementation of the gateway_fetch tool.
pub async fn fetch_impl(state: &AppState, params: GatewayFetchParams) -> Result<CallToolResult, McpError> {
    let method = parse_method(params.method.as_deref())?;
    let url = resolve(&state.origin, &params.url).map_err(precache_core::Error::from)?;
    let request = Request::new(method, url);

    let (version, response) = state.registration.fetch_once(&request).await?;

    tracing::debug!("{} {} served from {}", request.method, request.url, response.source.as_str());

    let output = GatewayFetchOutput {
        url: response.url,
        status: response.status,
        source: response.source.as_str().to_string(),
        revision: response.revision,
        content_type: response.content_type,
        version,
        body: String::from_utf8_lossy(&response.body).to_string(),
    };
    json_result(&output)
}
