//! Request interception gateway.
//!
//! One [`Gateway`] is one deployed version: a precache controller plus an
//! ordered route table over a shared cache store. Dispatch order is:
//!
//! 1. the precache route (GET requests for manifest URLs)
//! 2. declared routes, first match wins
//! 3. passthrough to the network without caching

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use precache_core::{CacheStore, CachedResponse, Error, SiteManifest};

use crate::fetch::{FetchResponse, Network, Request};
use crate::precache::{InstallReport, PrecacheController};
use crate::routing::RouteTable;

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// Where a dispatched response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Served from the precache.
    Precache,
    /// Served from the runtime cache.
    Cache,
    /// Fetched by a route's strategy.
    Network,
    /// No route matched; forwarded untouched.
    Passthrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Installing or activating.
    Installing,
    /// Installed, held back until the active version controls no pages.
    Waiting,
    Active,
    /// Superseded by a newer version.
    Redundant,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Precache => "precache",
            ResponseSource::Cache => "cache",
            ResponseSource::Network => "network",
            ResponseSource::Passthrough => "passthrough",
        }
    }
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Installing => "installing",
            LifecycleState::Waiting => "waiting",
            LifecycleState::Active => "active",
            LifecycleState::Redundant => "redundant",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Installing,
            1 => LifecycleState::Waiting,
            2 => LifecycleState::Active,
            _ => LifecycleState::Redundant,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    /// Manifest revision for precached responses.
    pub revision: Option<String>,
    pub source: ResponseSource,
}

impl GatewayResponse {
    pub fn from_network(response: FetchResponse, source: ResponseSource) -> Self {
        Self {
            headers: response.header_map(),
            url: response.url.to_string(),
            status: response.status,
            content_type: response.content_type,
            body: response.bytes,
            revision: None,
            source,
        }
    }

    pub fn from_cache(cached: CachedResponse, source: ResponseSource) -> Self {
        Self {
            url: cached.url,
            status: cached.status,
            content_type: cached.content_type,
            headers: cached.headers,
            body: Bytes::from(cached.body),
            revision: cached.revision,
            source,
        }
    }
}

pub struct Gateway {
    version: u64,
    origin: Url,
    network: Arc<dyn Network>,
    store: Arc<dyn CacheStore>,
    precache: PrecacheController,
    routes: RouteTable,
    runtime_cache: String,
    install_concurrency: usize,
    state: AtomicU8,
}

impl Gateway {
    /// Build a gateway for one manifest version. Nothing is fetched until
    /// [`Gateway::install`].
    pub fn new(
        origin: Url, manifest: &SiteManifest, network: Arc<dyn Network>, store: Arc<dyn CacheStore>,
    ) -> Result<Self, Error> {
        let version = NEXT_VERSION.fetch_add(1, Ordering::Relaxed);
        let entries = manifest.resolve(&origin)?;
        let precache = PrecacheController::new(entries, manifest.options.clone())?
            .with_staging_cache(format!("{}-temp-{version}", manifest.options.precache_cache_name()));
        let routes = RouteTable::compile(origin.clone(), &manifest.routes)?;

        Ok(Self {
            version,
            runtime_cache: manifest.options.runtime_cache_name(),
            origin,
            network,
            store,
            precache,
            routes,
            install_concurrency: 4,
            state: AtomicU8::new(LifecycleState::Installing as u8),
        })
    }

    pub fn with_install_concurrency(mut self, concurrency: usize) -> Self {
        self.install_concurrency = concurrency.max(1);
        self
    }

    /// Process-unique version number, increasing with construction order.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: LifecycleState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn precache_cache(&self) -> &str {
        self.precache.cache_name()
    }

    pub fn runtime_cache(&self) -> &str {
        &self.runtime_cache
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Stage new and re-revisioned manifest entries. The live precache is
    /// not touched until [`Gateway::activate`].
    pub async fn install(&self) -> Result<InstallReport, Error> {
        self.set_state(LifecycleState::Installing);
        self.precache
            .install(self.network.clone(), self.store.clone(), self.install_concurrency)
            .await
    }

    /// Move staged entries live, evict entries dropped from the manifest,
    /// and mark this version active.
    ///
    /// Returns the evicted URLs. On error the state is left unchanged.
    pub async fn activate(&self) -> Result<Vec<String>, Error> {
        let evicted = self.precache.activate(self.store.as_ref()).await?;
        self.set_state(LifecycleState::Active);
        tracing::info!(version = self.version, evicted = evicted.len(), "gateway active");
        Ok(evicted)
    }

    /// Retire a version that will never activate, dropping its staged entries.
    pub async fn discard(&self) -> Result<(), Error> {
        self.set_state(LifecycleState::Redundant);
        let removed = self.precache.discard(self.store.as_ref()).await?;
        tracing::debug!(version = self.version, removed, "discarded staged precache entries");
        Ok(())
    }

    /// Resolve an intercepted request to a response.
    pub async fn dispatch(&self, request: &Request) -> Result<GatewayResponse, Error> {
        if request.method == Method::GET
            && let Some(key) = self.precache.lookup(&request.url)
        {
            if let Some(cached) = self.store.get(self.precache.cache_name(), &key).await? {
                tracing::debug!("precache hit for {} ({})", request.url, key);
                return Ok(GatewayResponse::from_cache(cached, ResponseSource::Precache));
            }
            tracing::debug!("{} is precached but not stored yet; fetching", key);
            let response = self.network.fetch(request).await?;
            return Ok(GatewayResponse::from_network(response, ResponseSource::Network));
        }

        match self.routes.find(request) {
            Some((index, route)) => {
                tracing::debug!("{} {} matched route #{} ({})", request.method, request.url, index, route.pattern);
                route
                    .strategy
                    .handle(request, self.network.as_ref(), self.store.as_ref(), &self.runtime_cache)
                    .await
            }
            None => {
                tracing::debug!("{} {} matched no route; passing through", request.method, request.url);
                let response = self.network.fetch(request).await?;
                Ok(GatewayResponse::from_network(response, ResponseSource::Passthrough))
            }
        }
    }
}
