//! Environment-driven configuration

use crate::asset_cache::lifecycle::CacheSettings;
use crate::asset_cache::manifest::{
    build_stamp, generation_name, AssetManifest, CachePolicy, DEFAULT_CACHE_PREFIX,
    DEFAULT_OFFLINE_PAGE,
};
use chrono::Utc;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_LISTEN: &str = "127.0.0.1:8724";
const DEFAULT_STORAGE_DIR: &str = "./sitecache-storage";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("Failed to read manifest file {path}: {reason}")]
    ManifestFile { path: PathBuf, reason: String },
}

/// Which storage backend holds cache generations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Sqlite,
    Memory,
}

/// Optional JSON file overriding the built-in manifest and policy
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ManifestFile {
    pub assets: Option<Vec<String>>,
    pub offline_page: Option<String>,
    pub extensions: Option<Vec<String>>,
    pub asset_prefix: Option<String>,
}

impl ManifestFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ManifestFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&contents).map_err(|e| ConfigError::ManifestFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub upstream: Url,
    pub listen: SocketAddr,
    pub storage: StorageKind,
    pub storage_dir: PathBuf,
    pub fetch_timeout: Duration,
    pub user_agent: Option<String>,
    pub cache: CacheSettings,
}

impl Config {
    /// Read configuration from `SITECACHE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let upstream =
            lookup("SITECACHE_UPSTREAM").ok_or(ConfigError::Missing("SITECACHE_UPSTREAM"))?;
        let upstream = Url::parse(&upstream).map_err(|e| ConfigError::Invalid {
            name: "SITECACHE_UPSTREAM",
            reason: e.to_string(),
        })?;
        if !matches!(upstream.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                name: "SITECACHE_UPSTREAM",
                reason: format!("unsupported scheme {}", upstream.scheme()),
            });
        }

        let listen = lookup("SITECACHE_LISTEN")
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                name: "SITECACHE_LISTEN",
                reason: e.to_string(),
            })?;

        let storage = match lookup("SITECACHE_STORAGE").as_deref() {
            None | Some("sqlite") => StorageKind::Sqlite,
            Some("memory") => StorageKind::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "SITECACHE_STORAGE",
                    reason: format!("expected sqlite or memory, got {}", other),
                })
            }
        };

        let storage_dir = lookup("SITECACHE_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));

        let fetch_timeout = match lookup("SITECACHE_FETCH_TIMEOUT_SECS") {
            Some(secs) => secs.parse::<u64>().map_err(|e| ConfigError::Invalid {
                name: "SITECACHE_FETCH_TIMEOUT_SECS",
                reason: e.to_string(),
            })?,
            None => DEFAULT_FETCH_TIMEOUT_SECS,
        };

        let prefix =
            lookup("SITECACHE_CACHE_PREFIX").unwrap_or_else(|| DEFAULT_CACHE_PREFIX.to_string());
        let build_id = lookup("SITECACHE_BUILD_ID").unwrap_or_else(|| build_stamp(Utc::now()));

        let manifest_file = match lookup("SITECACHE_MANIFEST_FILE") {
            Some(path) => ManifestFile::load(Path::new(&path))?,
            None => ManifestFile::default(),
        };

        let generation = generation_name(&prefix, &build_id);
        Ok(Self {
            cache: cache_settings(upstream.clone(), generation, manifest_file),
            upstream,
            listen,
            storage,
            storage_dir,
            fetch_timeout: Duration::from_secs(fetch_timeout),
            user_agent: lookup("SITECACHE_USER_AGENT"),
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join("cache.db")
    }
}

fn cache_settings(origin: Url, generation: String, file: ManifestFile) -> CacheSettings {
    let offline_page = file
        .offline_page
        .unwrap_or_else(|| DEFAULT_OFFLINE_PAGE.to_string());
    let manifest = match file.assets {
        Some(assets) => AssetManifest::new(assets),
        None => AssetManifest::default(),
    }
    .with_offline_page(&offline_page);

    let mut policy = CachePolicy::default();
    if let Some(extensions) = file.extensions {
        policy.extensions = extensions;
    }
    if let Some(asset_prefix) = file.asset_prefix {
        policy.asset_prefix = asset_prefix;
    }

    CacheSettings {
        origin,
        generation,
        manifest,
        policy,
        offline_page,
    }
}
