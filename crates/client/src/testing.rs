//! Scripted network for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderValue};

use precache_core::Error;

use crate::fetch::{FetchResponse, Network, Request};

/// Serves canned bodies by URL, counts fetches, and can go offline.
/// Unknown URLs answer 404.
#[derive(Default)]
pub struct ScriptedNetwork {
    bodies: Mutex<HashMap<String, (u16, Bytes)>>,
    fetches: Mutex<HashMap<String, usize>>,
    offline: AtomicBool,
    delay: Option<Duration>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn serve(&self, url: &str, status: u16, body: &str) {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, Bytes::copy_from_slice(body.as_bytes())));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<FetchResponse, Error> {
        let key = request.url.to_string();
        *self.fetches.lock().unwrap().entry(key.clone()).or_default() += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::HttpError(format!("network error: {key} unreachable")));
        }

        let (status, bytes) = self
            .bodies
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or((404, Bytes::from_static(b"not found")));

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        Ok(FetchResponse {
            url: request.url.clone(),
            final_url: request.url.clone(),
            status,
            content_type: Some("text/plain".to_string()),
            bytes,
            headers,
            fetch_ms: 0,
        })
    }
}
