//! Precache manifest, opportunistic caching policy and generation naming

use crate::asset_cache::CacheError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Default offline fallback page
pub const DEFAULT_OFFLINE_PAGE: &str = "/offline.html";

/// Default prefix for cache generation names
pub const DEFAULT_CACHE_PREFIX: &str = "sitecache";

/// Extensions eligible for opportunistic caching
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "css", "js", "svg", "ico", "html",
];

/// URL segment whose assets are always eligible for opportunistic caching
pub const DEFAULT_ASSET_PREFIX: &str = "/assets/htmls/";

const DEFAULT_ASSETS: &[&str] = &[
    "/",
    "/assets/css/main.css",
    "/assets/js/main.min.js",
    "/assets/images/avatar.png",
    "/assets/htmls/fec.html",
    DEFAULT_OFFLINE_PAGE,
];

/// Ordered list of site-relative paths that must be present in a new generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest {
    assets: Vec<String>,
}

impl AssetManifest {
    /// Build a manifest, dropping repeated paths while keeping first-seen order
    pub fn new<I, S>(assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut manifest = Self { assets: Vec::new() };
        for asset in assets {
            manifest.push(asset.into());
        }
        manifest
    }

    fn push(&mut self, asset: String) {
        if !self.assets.contains(&asset) {
            self.assets.push(asset);
        }
    }

    /// Make sure the offline fallback page is precached
    pub fn with_offline_page(mut self, offline_page: &str) -> Self {
        self.push(offline_page.to_string());
        self
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Resolve every entry against the site origin
    pub fn resolve(&self, origin: &Url) -> Result<Vec<Url>, CacheError> {
        let mut urls: Vec<Url> = Vec::with_capacity(self.assets.len());
        for asset in &self.assets {
            let url = origin.join(asset).map_err(|e| {
                CacheError::InvalidUrl(format!("manifest entry {asset:?}: {e}"))
            })?;
            // Two spellings may resolve to the same URL
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        Ok(urls)
    }
}

impl Default for AssetManifest {
    fn default() -> Self {
        Self::new(DEFAULT_ASSETS.iter().copied())
    }
}

/// Which network responses may be added to the current generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub extensions: Vec<String>,
    pub asset_prefix: String,
}

impl CachePolicy {
    /// Whether a request URL is eligible for opportunistic caching
    ///
    /// The extension check runs against the whole URL string, so
    /// `/app.js?v=2` is not eligible unless it lives under the asset prefix.
    pub fn allows(&self, url: &str) -> bool {
        if url.contains(&self.asset_prefix) {
            return true;
        }
        match url.rsplit_once('.') {
            Some((_, ext)) => self.extensions.iter().any(|allowed| allowed == ext),
            None => false,
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            asset_prefix: DEFAULT_ASSET_PREFIX.to_string(),
        }
    }
}

/// Name of a cache generation: `{prefix}-{build_id}`
pub fn generation_name(prefix: &str, build_id: &str) -> String {
    format!("{}-{}", prefix, build_id)
}

/// Build-varying generation component derived from a point in time
pub fn build_stamp(time: DateTime<Utc>) -> String {
    time.format("%Y%m%d%H%M%S").to_string()
}
