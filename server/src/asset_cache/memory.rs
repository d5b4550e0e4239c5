//! In-memory implementation of the CacheStorage trait

use crate::asset_cache::{AssetResponse, CacheError, CacheStorage, RequestKey};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug)]
struct Generation {
    name: String,
    entries: HashMap<RequestKey, AssetResponse>,
}

/// Process-local cache storage; contents are lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    // Creation order is the lookup order for `match_any`
    generations: Mutex<Vec<Generation>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Generation>>, CacheError> {
        self.generations
            .lock()
            .map_err(|e| CacheError::Database(format!("Lock poisoned: {}", e)))
    }
}

#[async_trait::async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        let mut generations = self.lock()?;
        if !generations.iter().any(|g| g.name == name) {
            generations.push(Generation {
                name: name.to_string(),
                entries: HashMap::new(),
            });
            debug!("Created in-memory cache generation {}", name);
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.lock()?.iter().any(|g| g.name == name))
    }

    async fn match_in(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> Result<Option<AssetResponse>, CacheError> {
        if !key.is_cacheable_method() {
            return Ok(None);
        }
        let generations = self.lock()?;
        Ok(generations
            .iter()
            .find(|g| g.name == name)
            .and_then(|g| g.entries.get(key).cloned()))
    }

    async fn match_any(&self, key: &RequestKey) -> Result<Option<AssetResponse>, CacheError> {
        if !key.is_cacheable_method() {
            return Ok(None);
        }
        let generations = self.lock()?;
        Ok(generations
            .iter()
            .find_map(|g| g.entries.get(key).cloned()))
    }

    async fn put(
        &self,
        name: &str,
        key: &RequestKey,
        response: &AssetResponse,
    ) -> Result<(), CacheError> {
        self.put_all(name, &[(key.clone(), response.clone())]).await
    }

    async fn put_all(
        &self,
        name: &str,
        entries: &[(RequestKey, AssetResponse)],
    ) -> Result<(), CacheError> {
        // Validate the whole batch before touching the generation
        if let Some((key, _)) = entries.iter().find(|(k, _)| !k.is_cacheable_method()) {
            return Err(CacheError::InvalidUrl(format!(
                "cannot cache {} request for {}",
                key.method, key.url
            )));
        }

        let mut generations = self.lock()?;
        let generation = generations
            .iter_mut()
            .find(|g| g.name == name)
            .ok_or_else(|| CacheError::GenerationNotFound(name.to_string()))?;

        for (key, response) in entries {
            generation.entries.insert(key.clone(), response.clone());
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut generations = self.lock()?;
        let before = generations.len();
        generations.retain(|g| g.name != name);
        Ok(generations.len() != before)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.lock()?.iter().map(|g| g.name.clone()).collect())
    }

    async fn entries(&self, name: &str) -> Result<Vec<RequestKey>, CacheError> {
        let generations = self.lock()?;
        let generation = generations
            .iter()
            .find(|g| g.name == name)
            .ok_or_else(|| CacheError::GenerationNotFound(name.to_string()))?;

        let mut keys: Vec<RequestKey> = generation.entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn storage_type(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_cache::ResponseKind;
    use url::Url;

    fn key(path: &str) -> RequestKey {
        RequestKey::get(&Url::parse("https://example.com").unwrap().join(path).unwrap())
    }

    fn response(body: &str) -> AssetResponse {
        AssetResponse::new(200, body.to_string(), ResponseKind::Basic, "https://example.com/")
    }

    #[tokio::test]
    async fn test_open_put_and_match() {
        let store = MemoryCacheStorage::new();
        store.open("gen-1").await.unwrap();
        store.put("gen-1", &key("/a.css"), &response("a")).await.unwrap();

        let hit = store.match_in("gen-1", &key("/a.css")).await.unwrap();
        assert_eq!(hit.unwrap().body, "a");

        assert!(store.match_in("gen-1", &key("/b.css")).await.unwrap().is_none());
        assert!(store.match_in("gen-2", &key("/a.css")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_requires_open_generation() {
        let store = MemoryCacheStorage::new();

        let result = store.put("missing", &key("/a.css"), &response("a")).await;

        assert!(matches!(result, Err(CacheError::GenerationNotFound(_))));
    }

    #[tokio::test]
    async fn test_put_replaces_existing_entry() {
        let store = MemoryCacheStorage::new();
        store.open("gen-1").await.unwrap();
        store.put("gen-1", &key("/a.css"), &response("old")).await.unwrap();
        store.put("gen-1", &key("/a.css"), &response("new")).await.unwrap();

        assert_eq!(store.entries("gen-1").await.unwrap().len(), 1);
        let hit = store.match_any(&key("/a.css")).await.unwrap().unwrap();
        assert_eq!(hit.body, "new");
    }

    #[tokio::test]
    async fn test_match_any_prefers_oldest_generation() {
        let store = MemoryCacheStorage::new();
        store.open("gen-1").await.unwrap();
        store.open("gen-2").await.unwrap();
        store.put("gen-2", &key("/a.css"), &response("two")).await.unwrap();
        store.put("gen-1", &key("/a.css"), &response("one")).await.unwrap();

        let hit = store.match_any(&key("/a.css")).await.unwrap().unwrap();
        assert_eq!(hit.body, "one");
        assert_eq!(store.keys().await.unwrap(), ["gen-1", "gen-2"]);
    }

    #[tokio::test]
    async fn test_delete_generation() {
        let store = MemoryCacheStorage::new();
        store.open("gen-1").await.unwrap();
        store.put("gen-1", &key("/a.css"), &response("a")).await.unwrap();

        assert!(store.delete("gen-1").await.unwrap());
        assert!(!store.delete("gen-1").await.unwrap());
        assert!(!store.has("gen-1").await.unwrap());
        assert!(store.match_any(&key("/a.css")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_get_batch_is_rejected_whole() {
        let store = MemoryCacheStorage::new();
        store.open("gen-1").await.unwrap();
        let post = RequestKey::new("POST", &Url::parse("https://example.com/api").unwrap());

        let result = store
            .put_all("gen-1", &[(key("/a.css"), response("a")), (post, response("p"))])
            .await;

        assert!(result.is_err());
        assert!(store.entries("gen-1").await.unwrap().is_empty());
    }
}
