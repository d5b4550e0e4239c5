//! Hosting runtime for the offline cache
//!
//! Drives the install → activate sequence and tracks which lifecycle phase
//! the current generation has reached.

use crate::asset_cache::lifecycle::{FetchResolution, InstallReport, OfflineCache};
use crate::asset_cache::{AssetRequest, CacheError};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Installing,
    Installed,
    Activated,
    InstallFailed,
}

/// Snapshot reported by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HostStatus {
    pub phase: Phase,
    pub generation: String,
    pub generations: Vec<String>,
    pub storage_type: String,
    pub last_error: Option<String>,
}

/// Result of one install + activate run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartReport {
    pub install: InstallReport,
    pub deleted: Vec<String>,
}

pub struct CacheHost {
    cache: OfflineCache,
    phase: RwLock<Phase>,
    last_error: RwLock<Option<String>>,
    // Serializes lifecycle runs; fetch interception never takes it
    lifecycle: Mutex<()>,
}

impl CacheHost {
    pub fn new(cache: OfflineCache) -> Self {
        Self {
            cache,
            phase: RwLock::new(Phase::Idle),
            last_error: RwLock::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &OfflineCache {
        &self.cache
    }

    pub async fn phase(&self) -> Phase {
        *self.phase.read().await
    }

    async fn set_phase(&self, phase: Phase) {
        *self.phase.write().await = phase;
    }

    /// Install the current generation, then activate it
    ///
    /// Activation only runs after a successful install. On failure the
    /// existing generations are left in place and keep serving.
    pub async fn start(&self) -> Result<StartReport, CacheError> {
        let _guard = self.lifecycle.lock().await;

        self.set_phase(Phase::Installing).await;
        let install = match self.cache.install().await {
            Ok(report) => report,
            Err(e) => {
                error!("Install of {} failed: {}", self.cache.generation(), e);
                *self.last_error.write().await = Some(e.to_string());
                self.set_phase(Phase::InstallFailed).await;
                return Err(e);
            }
        };
        self.set_phase(Phase::Installed).await;

        let deleted = match self.cache.activate().await {
            Ok(deleted) => deleted,
            Err(e) => {
                // Installed generation is complete; stale ones remain until the next run
                error!("Activation of {} failed: {}", self.cache.generation(), e);
                *self.last_error.write().await = Some(e.to_string());
                return Err(e);
            }
        };
        self.set_phase(Phase::Activated).await;
        *self.last_error.write().await = None;

        info!(
            "Cache generation {} is active ({} entries)",
            install.generation, install.entries
        );
        Ok(StartReport { install, deleted })
    }

    pub async fn fetch(&self, request: AssetRequest) -> FetchResolution {
        self.cache.handle_fetch(request).await
    }

    pub async fn status(&self) -> Result<HostStatus, CacheError> {
        let storage = self.cache.storage();
        Ok(HostStatus {
            phase: self.phase().await,
            generation: self.cache.generation().to_string(),
            generations: storage.keys().await?,
            storage_type: storage.storage_type().to_string(),
            last_error: self.last_error.read().await.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_cache::lifecycle::CacheSettings;
    use crate::asset_cache::manifest::{AssetManifest, CachePolicy};
    use crate::asset_cache::memory::MemoryCacheStorage;
    use crate::asset_cache::testing::{StubFetcher, ORIGIN};
    use crate::asset_cache::CacheStorage;
    use std::sync::Arc;
    use url::Url;

    fn host(storage: Arc<MemoryCacheStorage>, fetcher: Arc<StubFetcher>) -> CacheHost {
        let settings = CacheSettings {
            origin: Url::parse(ORIGIN).unwrap(),
            generation: "sitecache-2".to_string(),
            manifest: AssetManifest::new(["/", "/offline.html"]),
            policy: CachePolicy::default(),
            offline_page: "/offline.html".to_string(),
        };
        CacheHost::new(OfflineCache::new(storage, fetcher, settings))
    }

    #[tokio::test]
    async fn test_start_installs_then_activates() {
        let storage = Arc::new(MemoryCacheStorage::new());
        storage.open("sitecache-1").await.unwrap();
        let fetcher = StubFetcher::new();
        fetcher.serve("/", "home").serve("/offline.html", "offline");
        let host = host(storage.clone(), Arc::new(fetcher));
        assert_eq!(host.phase().await, Phase::Idle);

        let report = host.start().await.unwrap();

        assert_eq!(report.install.entries, 2);
        assert_eq!(report.deleted, ["sitecache-1"]);
        assert_eq!(host.phase().await, Phase::Activated);

        let status = host.status().await.unwrap();
        assert_eq!(status.generations, ["sitecache-2"]);
        assert_eq!(status.storage_type, "memory");
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_failed_install_skips_activation() {
        let storage = Arc::new(MemoryCacheStorage::new());
        storage.open("sitecache-1").await.unwrap();
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.set_offline(true);
        let host = host(storage.clone(), fetcher.clone());

        assert!(host.start().await.is_err());
        assert_eq!(host.phase().await, Phase::InstallFailed);
        assert_eq!(storage.keys().await.unwrap(), ["sitecache-1"]);
        assert!(host.status().await.unwrap().last_error.is_some());

        // Retried once the origin is back
        fetcher.set_offline(false);
        fetcher.serve("/", "home").serve("/offline.html", "offline");
        host.start().await.unwrap();
        assert_eq!(host.phase().await, Phase::Activated);
        assert_eq!(storage.keys().await.unwrap(), ["sitecache-2"]);
    }
}
