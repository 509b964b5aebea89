//! Shared server state: the cache store, network, and version registration.

use std::path::Path;
use std::sync::Arc;

use url::Url;

use precache_client::{Gateway, Network, RegisterOutcome, Registration, RegistrationOptions};
use precache_core::{AppConfig, CacheDb, Error, SiteManifest};

use crate::error::ToolError;

pub struct AppState {
    pub config: AppConfig,
    pub origin: Url,
    pub db: Arc<CacheDb>,
    pub network: Arc<dyn Network>,
    pub registration: Registration,
}

impl AppState {
    pub fn new(config: AppConfig, origin: Url, db: Arc<CacheDb>, network: Arc<dyn Network>) -> Self {
        let registration = Registration::new(RegistrationOptions::from(&config), network.clone());
        Self { config, origin, db, network, registration }
    }

    /// Load the manifest at `path` and register it as a new gateway version.
    pub async fn activate(&self, path: &Path) -> Result<RegisterOutcome, Error> {
        let manifest = SiteManifest::load(path)?;
        let gateway = Gateway::new(self.origin.clone(), &manifest, self.network.clone(), self.db.clone())?
            .with_install_concurrency(self.config.install_concurrency);

        tracing::info!(
            "registering {} ({} precache entries, {} routes)",
            path.display(),
            manifest.precache.len(),
            manifest.routes.len()
        );
        self.registration.register(gateway).await
    }

    /// Map `precache` and `runtime` to the active version's cache names.
    /// Anything else is taken as a literal cache name.
    pub fn cache_name(&self, alias: &str) -> Result<String, ToolError> {
        match alias {
            "precache" | "runtime" => {
                let active = self.registration.active().ok_or(ToolError::NoActiveVersion)?;
                Ok(match alias {
                    "precache" => active.precache_cache().to_string(),
                    _ => active.runtime_cache().to_string(),
                })
            }
            "" => Err(ToolError::InvalidInput("cache name cannot be empty".into())),
            name => Ok(name.to_string()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_activate_registers_version() {
        let network = Arc::new(StaticNetwork::default());
        network.serve("https://blinging.love/a.js", "a");
        let state = state(network).await;

        let outcome = state.activate(&manifest_file("activate", MANIFEST)).await.unwrap();
        assert_eq!(outcome.install.fetched, vec!["https://blinging.love/a.js".to_string()]);
        assert_eq!(state.cache_name("precache").unwrap(), "precache-test");
        assert_eq!(state.cache_name("runtime").unwrap(), "runtime-test");
    }

    #[tokio::test]
    async fn test_activate_missing_manifest() {
        let state = state(Arc::new(StaticNetwork::default())).await;
        let result = state.activate(Path::new("/nonexistent/sw-manifest.json")).await;
        assert!(matches!(result, Err(Error::InvalidManifest(_))));
    }

    #[tokio::test]
    async fn test_cache_alias_needs_active_version() {
        let state = state(Arc::new(StaticNetwork::default())).await;
        assert!(matches!(state.cache_name("precache"), Err(ToolError::NoActiveVersion)));
        assert_eq!(state.cache_name("precache-other").unwrap(), "precache-other");
        assert!(state.cache_name("").is_err());
    }
}
