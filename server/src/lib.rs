pub mod asset_cache;
pub mod config;
pub mod runtime;
pub mod server;

// Re-export commonly used types
pub use asset_cache::lifecycle::{CacheSettings, FetchOutcome, OfflineCache};
pub use asset_cache::{CacheError, CacheStorage};
pub use config::Config;
pub use runtime::CacheHost;

use asset_cache::fetcher::HttpFetcher;
use asset_cache::memory::MemoryCacheStorage;
use asset_cache::sqlite::SqliteCacheStorage;
use config::StorageKind;
use std::sync::Arc;
use tracing::info;

pub type AppState = Arc<CacheHost>;

/// Wire storage, network and settings from configuration into a host
pub fn build_host(config: &Config) -> Result<CacheHost, CacheError> {
    let storage: Arc<dyn CacheStorage> = match config.storage {
        StorageKind::Sqlite => {
            let db_path = config.db_path();
            info!("Using SQLite cache storage at {}", db_path.display());
            Arc::new(SqliteCacheStorage::new(&db_path)?)
        }
        StorageKind::Memory => {
            info!("Using in-memory cache storage");
            Arc::new(MemoryCacheStorage::new())
        }
    };

    let fetcher = HttpFetcher::new(
        config.upstream.clone(),
        config.fetch_timeout,
        config.user_agent.as_deref(),
    )?;

    let cache = OfflineCache::new(storage, Arc::new(fetcher), config.cache.clone());
    Ok(CacheHost::new(cache))
}
