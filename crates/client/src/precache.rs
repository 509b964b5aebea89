//! Precache controller: installs manifest entries and serves them back.
//!
//! Install diffs the manifest against what the precache cache already holds
//! and fetches only new or re-revisioned entries, each one independently,
//! into a staging cache. The live cache is untouched until activation moves
//! the staged entries over and evicts entries that left the manifest.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use url::Url;

use precache_core::{CacheStore, Error, PrecacheEntry, PrecacheOptions};

use crate::fetch::{Network, Request, strip_params};

/// A manifest entry that could not be stored during install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFailure {
    pub url: String,
    pub reason: String,
}

impl From<AssetFailure> for Error {
    fn from(failure: AssetFailure) -> Self {
        Error::AssetFetchFailure { url: failure.url, reason: failure.reason }
    }
}

/// Outcome of one install pass. URL lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    /// Entries fetched and stored with their new revision.
    pub fetched: Vec<String>,
    /// Entries whose stored revision already matched.
    pub unchanged: Vec<String>,
    pub failed: Vec<AssetFailure>,
}

impl InstallReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct PrecacheController {
    entries: Vec<PrecacheEntry>,
    revisions: HashMap<String, String>,
    options: PrecacheOptions,
    ignored_params: Vec<Regex>,
    cache_name: String,
    staging_cache: String,
}

impl PrecacheController {
    pub fn new(entries: Vec<PrecacheEntry>, options: PrecacheOptions) -> Result<Self, Error> {
        let ignored_params = options
            .ignore_url_parameters_matching
            .iter()
            .map(|p| Regex::new(p).map_err(|e| Error::InvalidManifest(format!("ignoreUrlParametersMatching {p}: {e}"))))
            .collect::<Result<Vec<_>, _>>()?;

        let revisions = entries
            .iter()
            .map(|e| (e.url.to_string(), e.revision.clone()))
            .collect();

        let cache_name = options.precache_cache_name();
        Ok(Self {
            staging_cache: format!("{cache_name}-temp"),
            cache_name,
            entries,
            revisions,
            options,
            ignored_params,
        })
    }

    /// Stage installs under `name` instead of `<cache>-temp`.
    pub fn with_staging_cache(mut self, name: impl Into<String>) -> Self {
        self.staging_cache = name.into();
        self
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn staging_cache_name(&self) -> &str {
        &self.staging_cache
    }

    pub fn entries(&self) -> &[PrecacheEntry] {
        &self.entries
    }

    pub fn revision_of(&self, url: &str) -> Option<&str> {
        self.revisions.get(url).map(String::as_str)
    }

    /// URLs to try, in order, when looking `url` up in the precache.
    pub fn candidates(&self, url: &Url) -> Vec<Url> {
        let mut url = url.clone();
        url.set_fragment(None);

        let stripped = strip_params(&url, &self.ignored_params);
        let mut candidates = vec![url];
        if !candidates.contains(&stripped) {
            candidates.push(stripped.clone());
        }

        if stripped.path().ends_with('/') {
            let mut indexed = stripped.clone();
            indexed.set_path(&format!("{}{}", stripped.path(), self.options.directory_index));
            candidates.push(indexed);
        }

        if self.options.clean_urls {
            let mut clean = stripped.clone();
            clean.set_path(&format!("{}.html", stripped.path()));
            candidates.push(clean);
        }

        candidates
    }

    /// The manifest URL `url` resolves to, if any.
    pub fn lookup(&self, url: &Url) -> Option<String> {
        self.candidates(url)
            .into_iter()
            .map(|candidate| candidate.to_string())
            .find(|candidate| self.revisions.contains_key(candidate))
    }

    /// Fetch every entry whose stored revision differs from the manifest
    /// into the staging cache.
    ///
    /// Asset failures are collected in the report; only store errors abort
    /// the install.
    pub async fn install(
        &self, network: Arc<dyn Network>, store: Arc<dyn CacheStore>, concurrency: usize,
    ) -> Result<InstallReport, Error> {
        let leftover = self.discard(store.as_ref()).await?;
        if leftover > 0 {
            tracing::debug!("dropped {} stale entries from {}", leftover, self.staging_cache);
        }

        let mut report = InstallReport::default();
        let mut pending = Vec::new();

        for entry in &self.entries {
            let stored = store.get(&self.cache_name, entry.url.as_str()).await?;
            match stored.and_then(|s| s.revision) {
                Some(revision) if revision == entry.revision => report.unchanged.push(entry.url.to_string()),
                _ => pending.push(entry.clone()),
            }
        }

        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for entry in pending {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::AssetFetchFailure { url: entry.url.to_string(), reason: e.to_string() })?;
            let network = network.clone();
            let store = store.clone();
            let cache_name = self.staging_cache.clone();

            join_set.spawn(async move {
                let _permit = permit;
                let url = entry.url.to_string();
                let result = fetch_entry(network.as_ref(), store.as_ref(), &cache_name, entry).await;
                (url, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let (url, result) =
                joined.map_err(|e| Error::AssetFetchFailure { url: "precache task".into(), reason: e.to_string() })?;
            match result {
                Ok(()) => report.fetched.push(url),
                Err(err) => {
                    tracing::warn!(url = %url, error = %err, "precache entry not stored");
                    report.failed.push(AssetFailure { url, reason: err.to_string() });
                }
            }
        }

        report.fetched.sort();
        report.unchanged.sort();
        report.failed.sort_by(|a, b| a.url.cmp(&b.url));

        tracing::info!(
            cache = %self.cache_name,
            fetched = report.fetched.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            "precache install finished"
        );

        Ok(report)
    }

    /// Move staged entries into the live cache, then evict cached entries
    /// that are no longer in the manifest.
    ///
    /// Returns the evicted URLs, sorted.
    pub async fn activate(&self, store: &dyn CacheStore) -> Result<Vec<String>, Error> {
        for key in store.list_keys(&self.staging_cache).await? {
            if self.revisions.contains_key(&key)
                && let Some(staged) = store.get(&self.staging_cache, &key).await?
            {
                store.put(&self.cache_name, &staged).await?;
            }
            store.delete(&self.staging_cache, &key).await?;
        }

        let keep: HashSet<&str> = self.revisions.keys().map(String::as_str).collect();
        let mut evicted = Vec::new();

        for key in store.list_keys(&self.cache_name).await? {
            if keep.contains(key.as_str()) {
                continue;
            }
            if store.delete(&self.cache_name, &key).await? {
                tracing::debug!("evicted {} from {}", key, self.cache_name);
                evicted.push(key);
            }
        }

        evicted.sort();
        Ok(evicted)
    }

    /// Drop everything in the staging cache. Returns the number of entries removed.
    pub async fn discard(&self, store: &dyn CacheStore) -> Result<usize, Error> {
        let mut removed = 0;
        for key in store.list_keys(&self.staging_cache).await? {
            if store.delete(&self.staging_cache, &key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

async fn fetch_entry(
    network: &dyn Network, store: &dyn CacheStore, cache_name: &str, entry: PrecacheEntry,
) -> Result<(), Error> {
    let response = network.fetch(&Request::get(entry.url.clone())).await?;

    if !response.is_ok() {
        return Err(AssetFailure { url: entry.url.to_string(), reason: format!("status {}", response.status) }.into());
    }

    store.put(cache_name, &response.to_cached(Some(entry.revision))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedNetwork;
    use precache_core::{CacheDb, ManifestEntry, SiteManifest};

    const ORIGIN: &str = "https://blinging.love";

    fn controller(entries: &[(&str, &str)], options: PrecacheOptions) -> PrecacheController {
        let manifest = SiteManifest {
            precache: entries
                .iter()
                .map(|(url, revision)| ManifestEntry { url: url.to_string(), revision: revision.to_string() })
                .collect(),
            ..Default::default()
        };
        let resolved = manifest.resolve(&Url::parse(ORIGIN).unwrap()).unwrap();
        PrecacheController::new(resolved, options).unwrap()
    }

    fn url(path: &str) -> String {
        format!("{ORIGIN}{path}")
    }

    #[test]
    fn test_candidates_directory_index_and_clean_urls() {
        let ctl = controller(&[], PrecacheOptions::default());
        let candidates: Vec<String> = ctl
            .candidates(&Url::parse("https://blinging.love/?utm_source=mail").unwrap())
            .into_iter()
            .map(|u| u.to_string())
            .collect();

        assert_eq!(
            candidates,
            vec![
                "https://blinging.love/?utm_source=mail".to_string(),
                "https://blinging.love/".to_string(),
                "https://blinging.love/index.html".to_string(),
                "https://blinging.love/.html".to_string(),
            ]
        );
    }

    #[test]
    fn test_lookup_clean_url() {
        let ctl = controller(&[("/rsvp.html", "r1")], PrecacheOptions::default());
        let found = ctl.lookup(&Url::parse("https://blinging.love/rsvp").unwrap());
        assert_eq!(found, Some(url("/rsvp.html")));
    }

    #[test]
    fn test_lookup_respects_clean_urls_off() {
        let options = PrecacheOptions { clean_urls: false, ..Default::default() };
        let ctl = controller(&[("/rsvp.html", "r1")], options);
        assert!(ctl.lookup(&Url::parse("https://blinging.love/rsvp").unwrap()).is_none());
    }

    #[test]
    fn test_invalid_ignore_pattern() {
        let options = PrecacheOptions { ignore_url_parameters_matching: vec!["(".into()], ..Default::default() };
        assert!(matches!(PrecacheController::new(Vec::new(), options), Err(Error::InvalidManifest(_))));
    }

    async fn install_and_activate(entries: &[(&str, &str)], network: &Arc<ScriptedNetwork>, store: &Arc<CacheDb>) {
        let ctl = controller(entries, PrecacheOptions::default());
        ctl.install(network.clone(), store.clone(), 2).await.unwrap();
        ctl.activate(store.as_ref()).await.unwrap();
    }

    #[tokio::test]
    async fn test_install_stores_revisions() {
        let store = Arc::new(CacheDb::open_in_memory().await.unwrap());
        let network = Arc::new(ScriptedNetwork::new());
        network.serve(&url("/a.js"), 200, "a");
        network.serve(&url("/b.js"), 200, "b");
        let ctl = controller(&[("/a.js", "r1"), ("/b.js", "r7")], PrecacheOptions::default());

        let report = ctl.install(network.clone(), store.clone(), 2).await.unwrap();
        assert_eq!(report.fetched, vec![url("/a.js"), url("/b.js")]);
        assert!(report.is_complete());
        ctl.activate(store.as_ref()).await.unwrap();

        assert!(store.list_urls(ctl.staging_cache_name()).await.unwrap().is_empty());
        for entry in ctl.entries() {
            let stored = store.get_response(ctl.cache_name(), entry.url.as_str()).await.unwrap().unwrap();
            assert_eq!(stored.revision.as_deref(), Some(entry.revision.as_str()));
        }
    }

    #[tokio::test]
    async fn test_install_failure_is_reported_not_fatal() {
        let store = Arc::new(CacheDb::open_in_memory().await.unwrap());
        let network = Arc::new(ScriptedNetwork::new());
        network.serve(&url("/a.js"), 200, "a");
        let ctl = controller(&[("/a.js", "r1"), ("/gone.js", "r1")], PrecacheOptions::default());

        let report = ctl.install(network.clone(), store.clone(), 4).await.unwrap();
        assert_eq!(report.fetched, vec![url("/a.js")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].url, url("/gone.js"));
        assert!(report.failed[0].reason.contains("status 404"));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_copy() {
        let store = Arc::new(CacheDb::open_in_memory().await.unwrap());
        let network = Arc::new(ScriptedNetwork::new());
        network.serve(&url("/a.js"), 200, "v1");
        install_and_activate(&[("/a.js", "r1")], &network, &store).await;

        network.set_offline(true);
        let ctl = controller(&[("/a.js", "r2")], PrecacheOptions::default());
        let report = ctl.install(network.clone(), store.clone(), 1).await.unwrap();
        assert_eq!(report.failed.len(), 1);

        let stored = store.get_response(ctl.cache_name(), &url("/a.js")).await.unwrap().unwrap();
        assert_eq!(stored.revision.as_deref(), Some("r1"));
        assert_eq!(stored.body, b"v1");
    }

    #[tokio::test]
    async fn test_activate_evicts_removed_entries() {
        let store = Arc::new(CacheDb::open_in_memory().await.unwrap());
        let network = Arc::new(ScriptedNetwork::new());
        network.serve(&url("/a.js"), 200, "a");
        network.serve(&url("/old.js"), 200, "old");
        install_and_activate(&[("/a.js", "r1"), ("/old.js", "r1")], &network, &store).await;

        let ctl = controller(&[("/a.js", "r1")], PrecacheOptions::default());
        let report = ctl.install(network.clone(), store.clone(), 2).await.unwrap();
        assert_eq!(report.unchanged, vec![url("/a.js")]);

        let evicted = ctl.activate(store.as_ref()).await.unwrap();
        assert_eq!(evicted, vec![url("/old.js")]);
        assert_eq!(store.list_urls(ctl.cache_name()).await.unwrap(), vec![url("/a.js")]);
    }

    #[tokio::test]
    async fn test_install_stages_until_activate() {
        let store = Arc::new(CacheDb::open_in_memory().await.unwrap());
        let network = Arc::new(ScriptedNetwork::new());
        network.serve(&url("/a.js"), 200, "v1");
        install_and_activate(&[("/a.js", "r1")], &network, &store).await;

        network.serve(&url("/a.js"), 200, "v2");
        let ctl = controller(&[("/a.js", "r2")], PrecacheOptions::default()).with_staging_cache("precache-default-next");
        let report = ctl.install(network.clone(), store.clone(), 1).await.unwrap();
        assert_eq!(report.fetched, vec![url("/a.js")]);

        let live = store.get_response(ctl.cache_name(), &url("/a.js")).await.unwrap().unwrap();
        assert_eq!(live.revision.as_deref(), Some("r1"));
        let staged = store.get_response("precache-default-next", &url("/a.js")).await.unwrap().unwrap();
        assert_eq!(staged.revision.as_deref(), Some("r2"));

        ctl.activate(store.as_ref()).await.unwrap();
        let live = store.get_response(ctl.cache_name(), &url("/a.js")).await.unwrap().unwrap();
        assert_eq!(live.body, b"v2");
        assert!(store.list_urls("precache-default-next").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discard_drops_staged_entries() {
        let store = Arc::new(CacheDb::open_in_memory().await.unwrap());
        let network = Arc::new(ScriptedNetwork::new());
        network.serve(&url("/a.js"), 200, "a");
        let ctl = controller(&[("/a.js", "r1")], PrecacheOptions::default());
        ctl.install(network.clone(), store.clone(), 1).await.unwrap();

        assert_eq!(ctl.discard(store.as_ref()).await.unwrap(), 1);
        assert!(store.list_urls(ctl.staging_cache_name()).await.unwrap().is_empty());
        assert!(store.list_urls(ctl.cache_name()).await.unwrap().is_empty());
    }
}
