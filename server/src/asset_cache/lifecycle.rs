//! Cache generation lifecycle: install, activate and fetch interception
//!
//! Serving is cache-first: any stored response for a request wins over the
//! network, without freshness checks. Misses go to the network and eligible
//! same-origin responses are added to the current generation in the
//! background. Navigations that fail while offline get the precached
//! fallback page.

use crate::asset_cache::fetcher::Fetcher;
use crate::asset_cache::manifest::{AssetManifest, CachePolicy};
use crate::asset_cache::{
    AssetRequest, AssetResponse, CacheError, CacheStorage, RequestKey, ResponseKind,
};
use futures::future::{join_all, try_join_all};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Everything that identifies one deployment of the cache
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Site origin that manifest paths are resolved against
    pub origin: Url,
    /// Name of the generation created by this deployment
    pub generation: String,
    pub manifest: AssetManifest,
    pub policy: CachePolicy,
    /// Site-relative path of the offline fallback page
    pub offline_page: String,
}

/// Result of a completed install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub generation: String,
    pub entries: usize,
}

/// How an intercepted request was answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Served from a stored generation; the network was not touched
    Cached(AssetResponse),
    /// Served from the network (whether or not it was cached)
    Network(AssetResponse),
    /// Network failed for a navigation; served the precached offline page
    OfflineFallback(AssetResponse),
    /// Network failed and nothing can stand in for the response
    Unavailable { reason: String },
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&AssetResponse> {
        match self {
            FetchOutcome::Cached(r)
            | FetchOutcome::Network(r)
            | FetchOutcome::OfflineFallback(r) => Some(r),
            FetchOutcome::Unavailable { .. } => None,
        }
    }
}

/// A write to apply to cache storage after answering a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMutation {
    pub generation: String,
    pub key: RequestKey,
    pub response: AssetResponse,
}

/// Outcome of a fetch event plus the detached cache write it triggered
#[derive(Debug)]
pub struct FetchResolution {
    pub outcome: FetchOutcome,
    /// Background population of the current generation, if any
    pub cache_write: Option<JoinHandle<()>>,
}

/// Decide what to do with a network response for a cache miss
///
/// The response is always served unchanged. A copy is stored only when it
/// is a 200 same-origin response to a `GET` whose URL the policy allows.
pub fn plan_network_response(
    request: &AssetRequest,
    response: AssetResponse,
    generation: &str,
    policy: &CachePolicy,
) -> (AssetResponse, Option<CacheMutation>) {
    if response.status != 200 || response.kind != ResponseKind::Basic {
        return (response, None);
    }

    let key = request.key();
    if !key.is_cacheable_method() || !policy.allows(&key.url) {
        return (response, None);
    }

    let mutation = CacheMutation {
        generation: generation.to_string(),
        key,
        response: response.clone(),
    };
    (response, Some(mutation))
}

/// The offline asset cache manager
#[derive(Clone)]
pub struct OfflineCache {
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    settings: Arc<CacheSettings>,
}

impl OfflineCache {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            storage,
            fetcher,
            settings: Arc::new(settings),
        }
    }

    pub fn generation(&self) -> &str {
        &self.settings.generation
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    /// Precache every manifest entry into the current generation
    ///
    /// All entries are fetched before anything is written. If any fetch
    /// fails or returns a non-success status, the install fails and the
    /// storage is left untouched.
    pub async fn install(&self) -> Result<InstallReport, CacheError> {
        let generation = self.generation();
        let urls = self.settings.manifest.resolve(&self.settings.origin)?;

        info!(
            "Installing cache generation {} ({} manifest entries)",
            generation,
            urls.len()
        );

        let fetches = urls.into_iter().map(|url| async move {
            let request = AssetRequest::get(url);
            let response = self
                .fetcher
                .fetch(&request)
                .await
                .map_err(|e| CacheError::Precache {
                    url: request.url.to_string(),
                    reason: e.to_string(),
                })?;

            if !response.ok() {
                return Err(CacheError::Precache {
                    url: request.url.to_string(),
                    reason: format!("HTTP status {}", response.status),
                });
            }
            Ok((request.key(), response))
        });
        let entries = try_join_all(fetches).await?;

        let existed = self.storage.has(generation).await?;
        self.storage.open(generation).await?;
        info!("Opened cache generation {}", generation);
        if let Err(e) = self.storage.put_all(generation, &entries).await {
            if !existed {
                if let Err(cleanup) = self.storage.delete(generation).await {
                    warn!(
                        "Failed to remove partial generation {}: {}",
                        generation, cleanup
                    );
                }
            }
            return Err(e);
        }

        info!(
            "Installed cache generation {} with {} entries",
            generation,
            entries.len()
        );
        Ok(InstallReport {
            generation: generation.to_string(),
            entries: entries.len(),
        })
    }

    /// Delete every generation other than the current one
    ///
    /// Returns the names of the deleted generations.
    pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
        let current = self.generation();
        let stale: Vec<String> = self
            .storage
            .keys()
            .await?
            .into_iter()
            .filter(|name| name != current)
            .collect();

        let deletions = stale.iter().map(|name| async move {
            info!("Deleting stale cache generation {}", name);
            self.storage.delete(name).await
        });
        for result in join_all(deletions).await {
            result?;
        }

        info!(
            "Activated cache generation {} ({} stale removed)",
            current,
            stale.len()
        );
        Ok(stale)
    }

    /// Answer an intercepted request
    ///
    /// Never fails: lookup errors count as misses and cache-write errors are
    /// only logged.
    pub async fn handle_fetch(&self, request: AssetRequest) -> FetchResolution {
        let key = request.key();

        match self.storage.match_any(&key).await {
            Ok(Some(cached)) => {
                debug!("Cache hit: {} {}", key.method, key.url);
                return FetchResolution {
                    outcome: FetchOutcome::Cached(cached),
                    cache_write: None,
                };
            }
            Ok(None) => debug!("Cache miss: {} {}", key.method, key.url),
            Err(e) => warn!("Cache lookup failed for {}, treating as miss: {}", key.url, e),
        }

        // The incoming request stays with us for the cache key
        let network_request = request.clone();
        match self.fetcher.fetch(&network_request).await {
            Ok(response) => {
                let (response, mutation) = plan_network_response(
                    &request,
                    response,
                    self.generation(),
                    &self.settings.policy,
                );
                let cache_write = mutation.map(|m| self.spawn_cache_write(m));
                FetchResolution {
                    outcome: FetchOutcome::Network(response),
                    cache_write,
                }
            }
            Err(e) => {
                warn!("Network fetch failed for {}: {}", request.url, e);
                let outcome = if request.is_navigation() {
                    self.offline_fallback(e.to_string()).await
                } else {
                    FetchOutcome::Unavailable {
                        reason: e.to_string(),
                    }
                };
                FetchResolution {
                    outcome,
                    cache_write: None,
                }
            }
        }
    }

    async fn offline_fallback(&self, reason: String) -> FetchOutcome {
        let url = match self.settings.origin.join(&self.settings.offline_page) {
            Ok(url) => url,
            Err(e) => {
                warn!("Invalid offline page {}: {}", self.settings.offline_page, e);
                return FetchOutcome::Unavailable { reason };
            }
        };

        match self.storage.match_any(&RequestKey::get(&url)).await {
            Ok(Some(page)) => FetchOutcome::OfflineFallback(page),
            Ok(None) => {
                warn!("Offline page {} is not cached", url);
                FetchOutcome::Unavailable { reason }
            }
            Err(e) => {
                warn!("Offline page lookup failed: {}", e);
                FetchOutcome::Unavailable { reason }
            }
        }
    }

    fn spawn_cache_write(&self, mutation: CacheMutation) -> JoinHandle<()> {
        let storage = Arc::clone(&self.storage);
        tokio::spawn(async move {
            let result = async {
                storage.open(&mutation.generation).await?;
                storage
                    .put(&mutation.generation, &mutation.key, &mutation.response)
                    .await
            }
            .await;

            match result {
                Ok(()) => debug!(
                    "Cached {} in generation {}",
                    mutation.key.url, mutation.generation
                ),
                Err(e) => warn!("Failed to cache {}: {}", mutation.key.url, e),
            }
        })
    }
}
