//! Site manifest: precache entries, registration options and route declarations.
//!
//! The manifest is produced at build time and read as JSON:
//!
//! ```json
//! {
//!   "precache": [{ "url": "/_nuxt/app.js", "revision": "a0f4cb28" }],
//!   "options": { "cacheId": "blinging.love", "directoryIndex": "/", "cleanUrls": false },
//!   "routes": [{ "urlPattern": "/_nuxt/.*", "strategy": "cacheFirst", "method": "GET" }]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::Error;

/// One asset to precache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ManifestEntry {
    pub url: String,
    /// Content hash; changes exactly when the asset bytes change.
    pub revision: String,
}

/// A manifest entry with its URL resolved against the site origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheEntry {
    pub url: Url,
    pub revision: String,
}

/// Registration options for the precache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrecacheOptions {
    /// Namespaces the cache names.
    #[serde(default = "default_cache_id")]
    pub cache_id: String,

    /// Appended to request paths ending in `/` when looking up precached URLs.
    #[serde(default = "default_directory_index")]
    pub directory_index: String,

    /// Also try `<path>.html` when looking up precached URLs.
    #[serde(default = "default_true")]
    pub clean_urls: bool,

    /// Query parameter names (regexes) dropped when looking up precached URLs.
    #[serde(default = "default_ignored_params")]
    pub ignore_url_parameters_matching: Vec<String>,
}

fn default_cache_id() -> String {
    "default".into()
}

fn default_directory_index() -> String {
    "index.html".into()
}

fn default_true() -> bool {
    true
}

fn default_ignored_params() -> Vec<String> {
    vec!["^utm_".into()]
}

impl Default for PrecacheOptions {
    fn default() -> Self {
        Self {
            cache_id: default_cache_id(),
            directory_index: default_directory_index(),
            clean_urls: true,
            ignore_url_parameters_matching: default_ignored_params(),
        }
    }
}

impl PrecacheOptions {
    pub fn precache_cache_name(&self) -> String {
        format!("precache-{}", self.cache_id)
    }

    pub fn runtime_cache_name(&self) -> String {
        format!("runtime-{}", self.cache_id)
    }
}

/// Caching strategy selected by a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum StrategyKind {
    #[serde(alias = "cache-first")]
    CacheFirst,
    #[serde(alias = "network-first")]
    NetworkFirst,
    #[serde(alias = "network-only")]
    NetworkOnly,
    #[serde(alias = "cache-only")]
    CacheOnly,
}

/// Status allow-list for responses written to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CacheableResponse {
    pub statuses: Vec<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StrategyOptions {
    #[serde(default)]
    pub cacheable_response: Option<CacheableResponse>,

    /// Network-first only: give up on the network after this long and use the cache.
    #[serde(default)]
    pub network_timeout_seconds: Option<f64>,
}

/// A routing rule as declared in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteDecl {
    pub url_pattern: String,
    pub strategy: StrategyKind,
    #[serde(default)]
    pub options: StrategyOptions,
    #[serde(default = "default_method")]
    pub method: String,
}

fn default_method() -> String {
    "GET".into()
}

/// Everything the gateway needs for one deployed version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SiteManifest {
    #[serde(default)]
    pub precache: Vec<ManifestEntry>,
    #[serde(default)]
    pub options: PrecacheOptions,
    #[serde(default)]
    pub routes: Vec<RouteDecl>,
}

impl SiteManifest {
    /// Parse a manifest from JSON.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::InvalidManifest(e.to_string()))
    }

    /// Read and parse a manifest file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidManifest(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Resolve precache URLs against `origin`, enforcing the manifest invariants.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidManifest` if an entry has an empty URL or revision,
    /// a URL fails to parse, or two entries resolve to the same URL.
    pub fn resolve(&self, origin: &Url) -> Result<Vec<PrecacheEntry>, Error> {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(self.precache.len());

        for entry in &self.precache {
            if entry.url.trim().is_empty() {
                return Err(Error::InvalidManifest("precache entry with empty url".into()));
            }
            if entry.revision.is_empty() {
                return Err(Error::InvalidManifest(format!("{} has an empty revision", entry.url)));
            }

            let mut url = origin
                .join(entry.url.trim())
                .map_err(|e| Error::InvalidManifest(format!("{}: {e}", entry.url)))?;
            url.set_fragment(None);

            if !seen.insert(url.to_string()) {
                return Err(Error::InvalidManifest(format!("duplicate precache url: {url}")));
            }

            entries.push(PrecacheEntry { url, revision: entry.revision.clone() });
        }

        Ok(entries)
    }
}
