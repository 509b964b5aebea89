//! Cached response CRUD operations.
//!
//! Every write is a single UPSERT statement, so a key is either fully
//! replaced or left untouched.

use std::collections::BTreeMap;

use super::connection::CacheDb;
use super::hash::content_hash;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// A response held in one of the gateway's named caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CachedResponse {
    /// Request URL the response is keyed by.
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// SHA-256 of `body`, hex encoded.
    pub body_sha256: String,
    /// Manifest revision, set only for precached entries.
    pub revision: Option<String>,
    pub stored_at: String,
}

impl CachedResponse {
    /// Build a response stamped with the current time and body digest.
    pub fn new(url: impl Into<String>, status: u16, body: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            status,
            content_type: None,
            headers: BTreeMap::new(),
            body_sha256: content_hash(&body),
            body,
            revision: None,
            stored_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_revision(mut self, revision: Option<String>) -> Self {
        self.revision = revision;
        self
    }
}

impl CacheDb {
    /// Insert or replace a response in the named cache.
    pub async fn put_response(&self, cache: &str, response: &CachedResponse) -> Result<(), Error> {
        let cache = cache.to_string();
        let response = response.clone();
        let headers_json = serde_json::to_string(&response.headers)
            .map_err(|e| Error::InvalidInput(format!("failed to encode headers: {e}")))?;

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO responses (
                        cache_name, url, status, content_type, headers_json,
                        body, body_sha256, revision, stored_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    ON CONFLICT(cache_name, url) DO UPDATE SET
                        status = excluded.status,
                        content_type = excluded.content_type,
                        headers_json = excluded.headers_json,
                        body = excluded.body,
                        body_sha256 = excluded.body_sha256,
                        revision = excluded.revision,
                        stored_at = excluded.stored_at",
                    params![
                        &cache,
                        &response.url,
                        response.status,
                        &response.content_type,
                        &headers_json,
                        &response.body,
                        &response.body_sha256,
                        &response.revision,
                        &response.stored_at,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Get a response by URL from the named cache.
    ///
    /// Returns None if the URL isn't cached, and `Error::CorruptEntry` if the
    /// stored headers don't parse or the body doesn't match its digest.
    pub async fn get_response(&self, cache: &str, url: &str) -> Result<Option<CachedResponse>, Error> {
        let cache = cache.to_string();
        let url = url.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CachedResponse>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT url, status, content_type, headers_json, body, body_sha256, revision, stored_at
                     FROM responses WHERE cache_name = ?1 AND url = ?2",
                )?;

                let result = stmt.query_row(params![cache, url], |row| {
                    let headers_json: Option<String> = row.get(3)?;
                    Ok((
                        CachedResponse {
                            url: row.get(0)?,
                            status: row.get(1)?,
                            content_type: row.get(2)?,
                            headers: BTreeMap::new(),
                            body: row.get(4)?,
                            body_sha256: row.get(5)?,
                            revision: row.get(6)?,
                            stored_at: row.get(7)?,
                        },
                        headers_json,
                    ))
                });

                match result {
                    Ok((mut response, headers_json)) => {
                        if let Some(json) = headers_json {
                            response.headers = serde_json::from_str(&json)
                                .map_err(|e| Error::CorruptEntry(format!("{}: headers: {e}", response.url)))?;
                        }
                        if content_hash(&response.body) != response.body_sha256 {
                            return Err(Error::CorruptEntry(format!("{}: body digest mismatch", response.url)));
                        }
                        Ok(Some(response))
                    }
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Delete one URL from the named cache.
    ///
    /// Returns true if an entry was removed.
    pub async fn delete_response(&self, cache: &str, url: &str) -> Result<bool, Error> {
        let cache = cache.to_string();
        let url = url.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count =
                    conn.execute("DELETE FROM responses WHERE cache_name = ?1 AND url = ?2", params![cache, url])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// List cached URLs in the named cache, sorted.
    pub async fn list_urls(&self, cache: &str) -> Result<Vec<String>, Error> {
        let cache = cache.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT url FROM responses WHERE cache_name = ?1 ORDER BY url")?;
                let urls = stmt
                    .query_map(params![cache], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(urls)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every entry in the named cache.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_cache(&self, cache: &str) -> Result<u64, Error> {
        let cache = cache.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM responses WHERE cache_name = ?1", params![cache])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRECACHE: &str = "precache-test";
    const RUNTIME: &str = "runtime-test";

    fn make_test_response(url: &str, revision: Option<&str>) -> CachedResponse {
        let mut headers = BTreeMap::new();
        headers.insert("cache-control".to_string(), "max-age=31536000".to_string());
        CachedResponse::new(url, 200, format!("// {url}").into_bytes())
            .with_content_type(Some("application/javascript".to_string()))
            .with_headers(headers)
            .with_revision(revision.map(str::to_string))
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let response = make_test_response("https://blinging.love/_nuxt/a.js", Some("r1"));

        db.put_response(PRECACHE, &response).await.unwrap();

        let retrieved = db.get_response(PRECACHE, &response.url).await.unwrap().unwrap();
        assert_eq!(retrieved, response);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let result = db.get_response(PRECACHE, "https://blinging.love/missing").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_caches_are_isolated() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let response = make_test_response("https://blinging.love/", None);
        db.put_response(RUNTIME, &response).await.unwrap();

        assert!(db.get_response(PRECACHE, &response.url).await.unwrap().is_none());
        assert!(db.get_response(RUNTIME, &response.url).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_upsert_replaces_revision() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let url = "https://blinging.love/_nuxt/a.js";
        db.put_response(PRECACHE, &make_test_response(url, Some("r1"))).await.unwrap();

        let updated = CachedResponse::new(url, 200, b"new".to_vec()).with_revision(Some("r2".into()));
        db.put_response(PRECACHE, &updated).await.unwrap();

        let retrieved = db.get_response(PRECACHE, url).await.unwrap().unwrap();
        assert_eq!(retrieved.revision.as_deref(), Some("r2"));
        assert_eq!(retrieved.body, b"new");
        assert_eq!(db.list_urls(PRECACHE).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_response(PRECACHE, &make_test_response("https://blinging.love/b.js", None))
            .await
            .unwrap();
        db.put_response(PRECACHE, &make_test_response("https://blinging.love/a.js", None))
            .await
            .unwrap();

        assert_eq!(
            db.list_urls(PRECACHE).await.unwrap(),
            vec!["https://blinging.love/a.js".to_string(), "https://blinging.love/b.js".to_string()]
        );

        assert!(db.delete_response(PRECACHE, "https://blinging.love/a.js").await.unwrap());
        assert!(!db.delete_response(PRECACHE, "https://blinging.love/a.js").await.unwrap());
        assert_eq!(db.list_urls(PRECACHE).await.unwrap(), vec!["https://blinging.love/b.js".to_string()]);
    }

    async fn tamper(db: &CacheDb, column: &'static str, value: &'static str) {
        db.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(&format!("UPDATE responses SET {column} = ?1"), params![value])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_rejects_tampered_body() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let url = "https://blinging.love/_nuxt/a.js";
        db.put_response(PRECACHE, &make_test_response(url, Some("r1"))).await.unwrap();

        tamper(&db, "body_sha256", "00").await;

        let result = db.get_response(PRECACHE, url).await;
        assert!(matches!(result, Err(Error::CorruptEntry(_))));
    }

    #[tokio::test]
    async fn test_get_rejects_corrupt_headers() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let url = "https://blinging.love/_nuxt/a.js";
        db.put_response(PRECACHE, &make_test_response(url, Some("r1"))).await.unwrap();

        tamper(&db, "headers_json", "{not json").await;

        let result = db.get_response(PRECACHE, url).await;
        assert!(matches!(result, Err(Error::CorruptEntry(_))));
    }

    #[tokio::test]
    async fn test_purge_cache() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.put_response(PRECACHE, &make_test_response("https://blinging.love/a.js", None))
            .await
            .unwrap();
        db.put_response(RUNTIME, &make_test_response("https://blinging.love/", None))
            .await
            .unwrap();

        assert_eq!(db.purge_cache(PRECACHE).await.unwrap(), 1);
        assert!(db.list_urls(PRECACHE).await.unwrap().is_empty());
        assert_eq!(db.list_urls(RUNTIME).await.unwrap().len(), 1);
    }
}
