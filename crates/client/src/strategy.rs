//! Caching strategies applied by matched routes.

use std::time::Duration;

use precache_core::{CacheStore, Error, StrategyKind, StrategyOptions};

use crate::fetch::{Network, Request};
use crate::gateway::{GatewayResponse, ResponseSource};

/// A strategy with its cacheability rules resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub kind: StrategyKind,
    /// Statuses allowed into the cache.
    pub cacheable_statuses: Vec<u16>,
    /// Network-first only.
    pub network_timeout: Option<Duration>,
}

impl Strategy {
    /// Build a strategy, falling back to the per-kind default status list
    /// when `options.cacheable_response` is absent: `[200]` for cache-first,
    /// `[0, 200]` for network-first.
    pub fn new(kind: StrategyKind, options: &StrategyOptions) -> Result<Self, Error> {
        let cacheable_statuses = match &options.cacheable_response {
            Some(cacheable) => cacheable.statuses.clone(),
            None if kind == StrategyKind::NetworkFirst => vec![0, 200],
            None => vec![200],
        };

        let network_timeout = match options.network_timeout_seconds {
            Some(secs) if !secs.is_finite() || secs <= 0.0 => {
                return Err(Error::InvalidRoute(format!("networkTimeoutSeconds must be positive, got {secs}")));
            }
            Some(secs) => Some(Duration::from_secs_f64(secs)),
            None => None,
        };

        Ok(Self { kind, cacheable_statuses, network_timeout })
    }

    pub fn is_cacheable(&self, status: u16) -> bool {
        self.cacheable_statuses.contains(&status)
    }

    /// Resolve `request` according to this strategy, reading and writing `cache`.
    pub async fn handle(
        &self, request: &Request, network: &dyn Network, store: &dyn CacheStore, cache: &str,
    ) -> Result<GatewayResponse, Error> {
        match self.kind {
            StrategyKind::CacheFirst => self.cache_first(request, network, store, cache).await,
            StrategyKind::NetworkFirst => self.network_first(request, network, store, cache).await,
            StrategyKind::NetworkOnly => {
                let response = network.fetch(request).await?;
                Ok(GatewayResponse::from_network(response, ResponseSource::Network))
            }
            StrategyKind::CacheOnly => store
                .get(cache, request.url.as_str())
                .await?
                .map(|cached| GatewayResponse::from_cache(cached, ResponseSource::Cache))
                .ok_or_else(|| Error::CacheMiss(request.url.to_string())),
        }
    }

    async fn cache_first(
        &self, request: &Request, network: &dyn Network, store: &dyn CacheStore, cache: &str,
    ) -> Result<GatewayResponse, Error> {
        if let Some(cached) = store.get(cache, request.url.as_str()).await? {
            tracing::debug!("cache hit for {} in {}", request.url, cache);
            return Ok(GatewayResponse::from_cache(cached, ResponseSource::Cache));
        }

        tracing::debug!("cache miss for {} in {}", request.url, cache);
        let response = network.fetch(request).await?;
        self.store_if_cacheable(&response, store, cache).await;
        Ok(GatewayResponse::from_network(response, ResponseSource::Network))
    }

    async fn network_first(
        &self, request: &Request, network: &dyn Network, store: &dyn CacheStore, cache: &str,
    ) -> Result<GatewayResponse, Error> {
        let fetched = match self.network_timeout {
            Some(limit) => tokio::time::timeout(limit, network.fetch(request))
                .await
                .unwrap_or_else(|_| Err(Error::FetchTimeout(format!("{} after {}ms", request.url, limit.as_millis())))),
            None => network.fetch(request).await,
        };

        match fetched {
            Ok(response) => {
                self.store_if_cacheable(&response, store, cache).await;
                Ok(GatewayResponse::from_network(response, ResponseSource::Network))
            }
            Err(err) if err.is_network() => {
                if let Some(cached) = store.get(cache, request.url.as_str()).await? {
                    tracing::debug!("network failed for {} ({}); serving cached copy", request.url, err);
                    return Ok(GatewayResponse::from_cache(cached, ResponseSource::Cache));
                }
                Err(Error::NetworkUnavailable(format!("{}: {}", request.url, err)))
            }
            Err(err) => Err(err),
        }
    }

    /// Cache writes are best-effort; a failed write never fails the request.
    async fn store_if_cacheable(&self, response: &crate::fetch::FetchResponse, store: &dyn CacheStore, cache: &str) {
        if !self.is_cacheable(response.status) {
            tracing::debug!("not caching {} (status {})", response.url, response.status);
            return;
        }

        if let Err(err) = store.put(cache, &response.to_cached(None)).await {
            tracing::warn!(url = %response.url, error = %err, "failed to write runtime cache");
        }
    }
}
