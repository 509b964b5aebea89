//! cache_purge tool implementation.
//!
//! Deletes one URL from a cache, or the whole cache. Relative URLs resolve
//! against the gateway origin, the same way gateway_fetch keys them.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use precache_client::fetch::resolve;

use crate::state::AppState;
use crate::tools::json_result;

/// Parameters for the cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeParams {
    /// `precache`, `runtime`, or a full cache name.
    pub cache: String,

    /// Delete only this URL (relative URLs resolve against the origin);
    /// omit to empty the cache.
    #[serde(default)]
    pub url: Option<String>,
}

/// Output from the cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeOutput {
    pub cache: String,
    /// Number of entries deleted.
    pub deleted: u64,
}

/// Implementation of the cache_purge tool.
pub async fn purge_impl(state: &AppState, params: CachePurgeParams) -> Result<CallToolResult, McpError> {
    let cache = state.cache_name(&params.cache)?;

    let deleted = match params.url {
        Some(url) => {
            let url = resolve(&state.origin, &url).map_err(precache_core::Error::from)?;
            u64::from(state.db.delete_response(&cache, url.as_str()).await?)
        }
        None => state.db.purge_cache(&cache).await?,
    };
    tracing::info!("purged {deleted} entries from {cache}");

    json_result(&CachePurgeOutput { cache, deleted })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::state::test_support::*;
    use crate::tools::output_of;
    use precache_core::CachedResponse;

    async fn seeded() -> AppState {
        let state = state(Arc::new(StaticNetwork::default())).await;
        for url in ["https://blinging.love/a", "https://blinging.love/b"] {
            state
                .db
                .put_response("runtime-x", &CachedResponse::new(url, 200, b"x".to_vec()))
                .await
                .unwrap();
        }
        state
    }

    #[tokio::test]
    async fn test_purge_single_url() {
        let state = seeded().await;
        let params = CachePurgeParams { cache: "runtime-x".into(), url: Some("https://blinging.love/a".into()) };

        let output: CachePurgeOutput = output_of(&purge_impl(&state, params).await.unwrap());
        assert_eq!(output.deleted, 1);
        assert_eq!(state.db.list_urls("runtime-x").await.unwrap(), vec!["https://blinging.love/b".to_string()]);
    }

    #[tokio::test]
    async fn test_purge_whole_cache() {
        let state = seeded().await;
        let params = CachePurgeParams { cache: "runtime-x".into(), url: None };

        let output: CachePurgeOutput = output_of(&purge_impl(&state, params).await.unwrap());
        assert_eq!(output.deleted, 2);
        assert!(state.db.list_urls("runtime-x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_missing_url() {
        let state = seeded().await;
        let params = CachePurgeParams { cache: "runtime-x".into(), url: Some("https://blinging.love/zzz".into()) };

        let output: CachePurgeOutput = output_of(&purge_impl(&state, params).await.unwrap());
        assert_eq!(output.deleted, 0);
    }

    #[tokio::test]
    async fn test_purge_relative_url() {
        let state = seeded().await;
        let params = CachePurgeParams { cache: "runtime-x".into(), url: Some("/a#top".into()) };

        let output: CachePurgeOutput = output_of(&purge_impl(&state, params).await.unwrap());
        assert_eq!(output.deleted, 1);
        assert_eq!(state.db.list_urls("runtime-x").await.unwrap(), vec!["https://blinging.love/b".to_string()]);
    }

    #[tokio::test]
    async fn test_purge_rejects_bad_url() {
        let state = seeded().await;
        let params = CachePurgeParams { cache: "runtime-x".into(), url: Some("ftp://blinging.love/a".into()) };

        assert!(purge_impl(&state, params).await.is_err());
        assert_eq!(state.db.list_urls("runtime-x").await.unwrap().len(), 2);
    }
}
