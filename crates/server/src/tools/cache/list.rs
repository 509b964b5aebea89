//! cache_list tool implementation.
//!
//! Lists the URLs stored in one cache.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::tools::json_result;

/// Parameters for the cache_list tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheListParams {
    /// `precache` (default), `runtime`, or a full cache name.
    #[serde(default)]
    pub cache: Option<String>,
}

/// Output from the cache_list tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheListOutput {
    pub cache: String,
    pub count: usize,
    /// Stored URLs, sorted.
    pub urls: Vec<String>,
}

/// Implementation of the cache_list tool.
pub async fn list_impl(state: &AppState, params: CacheListParams) -> Result<CallToolResult, McpError> {
    let cache = state.cache_name(params.cache.as_deref().unwrap_or("precache"))?;
    let urls = state.db.list_urls(&cache).await?;

    json_result(&CacheListOutput { cache, count: urls.len(), urls })
}
