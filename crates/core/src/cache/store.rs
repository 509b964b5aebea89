//! Store interface the gateway is written against.

use async_trait::async_trait;

use super::connection::CacheDb;
use super::responses::CachedResponse;
use crate::Error;

/// Key-value response store scoped by cache name.
///
/// Writes to a single key are atomic and last-writer-wins; there is no
/// transaction spanning several keys.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, cache: &str, url: &str) -> Result<Option<CachedResponse>, Error>;

    async fn put(&self, cache: &str, response: &CachedResponse) -> Result<(), Error>;

    /// Returns true if an entry was removed.
    async fn delete(&self, cache: &str, url: &str) -> Result<bool, Error>;

    async fn list_keys(&self, cache: &str) -> Result<Vec<String>, Error>;
}

#[async_trait]
impl CacheStore for CacheDb {
    async fn get(&self, cache: &str, url: &str) -> Result<Option<CachedResponse>, Error> {
        self.get_response(cache, url).await
    }

    async fn put(&self, cache: &str, response: &CachedResponse) -> Result<(), Error> {
        self.put_response(cache, response).await
    }

    async fn delete(&self, cache: &str, url: &str) -> Result<bool, Error> {
        self.delete_response(cache, url).await
    }

    async fn list_keys(&self, cache: &str) -> Result<Vec<String>, Error> {
        self.list_urls(cache).await
    }
}
