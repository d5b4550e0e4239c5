//! Offline asset cache for Sitecache
//!
//! This module provides the cache generation model, the storage seam used
//! to persist generations, and the lifecycle (install / activate / fetch
//! interception) that serves site assets cache-first.

pub mod fetcher;
pub mod lifecycle;
pub mod manifest;
pub mod memory;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod testing;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Error type for asset caching operations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache generation not found: {0}")]
    GenerationNotFound(String),

    #[error("Precache of {url} failed: {reason}")]
    Precache { url: String, reason: String },

    #[error("Fetch error: {0}")]
    Fetch(#[from] fetcher::FetchError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        CacheError::Database(e.to_string())
    }
}

impl From<url::ParseError> for CacheError {
    fn from(e: url::ParseError) -> Self {
        CacheError::InvalidUrl(e.to_string())
    }
}

/// Normalized identity of a request: method plus absolute URL without fragment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: &str, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
        }
    }

    /// Shorthand for a `GET` key
    pub fn get(url: &Url) -> Self {
        Self::new("GET", url)
    }

    /// Only `GET` requests take part in cache matching and storage
    pub fn is_cacheable_method(&self) -> bool {
        self.method == "GET"
    }
}

/// How the requester intends to use the response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Top-level document load
    Navigate,
    SameOrigin,
    NoCors,
    Cors,
}

/// An outbound request offered to the cache for interception
///
/// Cloning is cheap: the body is reference counted, so the request can be
/// kept for cache storage while a copy goes to the network.
#[derive(Debug, Clone)]
pub struct AssetRequest {
    pub method: String,
    pub url: Url,
    pub mode: RequestMode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl AssetRequest {
    pub fn new(method: &str, url: Url, mode: RequestMode) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url,
            mode,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// A plain `GET` as issued when precaching manifest entries
    pub fn get(url: Url) -> Self {
        Self::new("GET", url, RequestMode::Cors)
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// Origin classification of a response, as seen by the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Same-origin response
    Basic,
    Cors,
    Opaque,
    Error,
}

impl ResponseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKind::Basic => "basic",
            ResponseKind::Cors => "cors",
            ResponseKind::Opaque => "opaque",
            ResponseKind::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "basic" => Some(ResponseKind::Basic),
            "cors" => Some(ResponseKind::Cors),
            "opaque" => Some(ResponseKind::Opaque),
            "error" => Some(ResponseKind::Error),
            _ => None,
        }
    }
}

/// A complete response value
///
/// Responses are immutable; the body is a shared buffer, so the same
/// response can be returned to the requester and written to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub kind: ResponseKind,
    /// Final URL the response was served from
    pub url: String,
}

impl AssetResponse {
    pub fn new(status: u16, body: impl Into<Bytes>, kind: ResponseKind, url: &str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            kind,
            url: url.to_string(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// 2xx status
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Trait for cache generation storage
///
/// A generation is a named map from request keys to responses. This
/// abstraction allows for different storage backends (in-memory, SQLite)
/// behind the same lifecycle.
#[async_trait::async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the named generation if it does not exist yet
    async fn open(&self, name: &str) -> Result<(), CacheError>;

    /// Check whether a generation exists
    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Look up a request in a single generation
    async fn match_in(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> Result<Option<AssetResponse>, CacheError>;

    /// Look up a request across all generations, oldest generation first
    async fn match_any(&self, key: &RequestKey) -> Result<Option<AssetResponse>, CacheError>;

    /// Insert or replace an entry in an existing generation
    async fn put(
        &self,
        name: &str,
        key: &RequestKey,
        response: &AssetResponse,
    ) -> Result<(), CacheError>;

    /// Insert a batch of entries; either all are stored or none are
    ///
    /// The default implementation stores entries one at a time, which is
    /// only all-or-nothing for backends whose `put` cannot fail midway.
    async fn put_all(
        &self,
        name: &str,
        entries: &[(RequestKey, AssetResponse)],
    ) -> Result<(), CacheError> {
        for (key, response) in entries {
            self.put(name, key, response).await?;
        }
        Ok(())
    }

    /// Delete a generation and its entries
    ///
    /// Returns `false` if the generation did not exist.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// List generation names in creation order
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// List the request keys stored in a generation
    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>, CacheError>;

    /// Get the storage type identifier (e.g., "memory", "sqlite")
    fn storage_type(&self) -> &str;
}
