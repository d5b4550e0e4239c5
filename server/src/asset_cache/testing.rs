//! Test doubles for the network and storage seams

use crate::asset_cache::fetcher::{FetchError, Fetcher};
use crate::asset_cache::memory::MemoryCacheStorage;
use crate::asset_cache::{
    AssetRequest, AssetResponse, CacheError, CacheStorage, RequestKey, ResponseKind,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub const ORIGIN: &str = "https://blog.example.com";

/// Scripted fetcher: serves registered URLs, 404s everything else
#[derive(Default)]
pub struct StubFetcher {
    routes: Mutex<HashMap<String, AssetResponse>>,
    calls: AtomicUsize,
    offline: AtomicBool,
    last_headers: Mutex<Vec<(String, String)>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a same-origin 200 response for a site-relative path
    pub fn serve(&self, path: &str, body: &str) -> &Self {
        let url = format!("{}{}", ORIGIN, path);
        let response = AssetResponse::new(200, body.to_string(), ResponseKind::Basic, &url);
        self.serve_response(path, response)
    }

    pub fn serve_response(&self, path: &str, response: AssetResponse) -> &Self {
        let url = format!("{}{}", ORIGIN, path);
        self.routes.lock().unwrap().insert(url, response);
        self
    }

    /// Simulate losing connectivity: every fetch fails at the transport level
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Headers carried by the most recent request
    pub fn last_headers(&self) -> Vec<(String, String)> {
        self.last_headers.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_headers.lock().unwrap() = request.headers.clone();
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Network("connection refused".to_string()));
        }
        let routes = self.routes.lock().unwrap();
        Ok(routes
            .get(request.url.as_str())
            .cloned()
            .unwrap_or_else(|| {
                AssetResponse::new(404, "not found", ResponseKind::Basic, request.url.as_str())
            }))
    }
}

/// Memory storage whose writes always fail
#[derive(Default)]
pub struct FailingPutStorage {
    inner: MemoryCacheStorage,
}

#[async_trait::async_trait]
impl CacheStorage for FailingPutStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        self.inner.has(name).await
    }

    async fn match_in(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> Result<Option<AssetResponse>, CacheError> {
        self.inner.match_in(name, key).await
    }

    async fn match_any(&self, key: &RequestKey) -> Result<Option<AssetResponse>, CacheError> {
        self.inner.match_any(key).await
    }

    async fn put(
        &self,
        _name: &str,
        _key: &RequestKey,
        _response: &AssetResponse,
    ) -> Result<(), CacheError> {
        Err(CacheError::Database("disk full".to_string()))
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        self.inner.delete(name).await
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.inner.keys().await
    }

    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>, CacheError> {
        self.inner.entries(name).await
    }

    fn storage_type(&self) -> &str {
        "failing"
    }
}
