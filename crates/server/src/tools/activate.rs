//! gateway_activate tool implementation.
//!
//! Loads a site manifest and registers it as a new gateway version.

use std::path::PathBuf;

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::tools::json_result;

/// Input parameters for gateway_activate tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GatewayActivateParams {
    /// Manifest file to load (default: the configured manifest_path).
    #[serde(default)]
    pub manifest_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FailedAsset {
    pub url: String,
    pub reason: String,
}

/// Output structure for gateway_activate tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GatewayActivateOutput {
    pub manifest_path: String,
    pub version: u64,
    /// `active`, or `waiting` while older pages are still open.
    pub state: String,
    pub fetched: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<FailedAsset>,
    pub evicted: Vec<String>,
}

/// Implementation of the gateway_activate tool.
pub async fn activate_impl(state: &AppState, params: GatewayActivateParams) -> Result<CallToolResult, McpError> {
    let path = params
        .manifest_path
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| state.config.manifest_path.clone());

    let outcome = state.activate(&path).await?;

    let output = GatewayActivateOutput {
        manifest_path: path.display().to_string(),
        version: outcome.version,
        state: outcome.state.as_str().to_string(),
        fetched: outcome.install.fetched,
        unchanged: outcome.install.unchanged,
        failed: outcome
            .install
            .failed
            .into_iter()
            .map(|f| FailedAsset { url: f.url, reason: f.reason })
            .collect(),
        evicted: outcome.evicted,
    };
    json_result(&output)
}
