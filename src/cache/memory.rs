//! In-process cache storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::CacheStorage;
use crate::error::Result;
use crate::request::{AssetResponse, CacheKey};

type Caches = BTreeMap<String, HashMap<CacheKey, AssetResponse>>;

/// Cache storage kept entirely in memory.
///
/// Used by tests and by `bearbang serve --memory`, where nothing should
/// survive the process.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: Mutex<Caches>,
}

impl MemoryCacheStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Caches) -> T) -> T {
        let mut guard = self
            .caches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        self.with(|caches| {
            caches.entry(name.to_string()).or_default();
        });
        Ok(())
    }

    async fn names(&self) -> Result<Vec<String>> {
        Ok(self.with(|caches| caches.keys().cloned().collect()))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.with(|caches| caches.remove(name).is_some()))
    }

    async fn lookup(&self, name: &str, key: &CacheKey) -> Result<Option<AssetResponse>> {
        Ok(self.with(|caches| caches.get(name).and_then(|c| c.get(key)).cloned()))
    }

    async fn put(&self, name: &str, key: &CacheKey, response: &AssetResponse) -> Result<()> {
        self.with(|caches| {
            caches
                .entry(name.to_string())
                .or_default()
                .insert(key.clone(), response.clone());
        });
        Ok(())
    }

    async fn keys(&self, name: &str) -> Result<Vec<CacheKey>> {
        let mut keys: Vec<_> =
            self.with(|caches| caches.get(name).map(|c| c.keys().cloned().collect()))
                .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(url: &str) -> CacheKey {
        CacheKey::new("GET", url)
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let storage = MemoryCacheStorage::new();
        storage.open("a-v1").await.unwrap();
        storage.put("a-v1", &key("https://x/1"), &AssetResponse::new(200, "one")).await.unwrap();
        storage.open("a-v1").await.unwrap();
        assert_eq!(storage.names().await.unwrap(), vec!["a-v1".to_string()]);
        assert_eq!(storage.keys("a-v1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn put_replaces_and_lookup_is_per_cache() {
        let storage = MemoryCacheStorage::new();
        storage.put("a-v1", &key("https://x/1"), &AssetResponse::new(200, "old")).await.unwrap();
        storage.put("a-v1", &key("https://x/1"), &AssetResponse::new(200, "new")).await.unwrap();

        let hit = storage.lookup("a-v1", &key("https://x/1")).await.unwrap().unwrap();
        assert_eq!(hit.body.as_ref(), b"new");
        assert!(storage.lookup("a-v2", &key("https://x/1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let storage = MemoryCacheStorage::new();
        storage.open("a-v1").await.unwrap();
        assert!(storage.delete("a-v1").await.unwrap());
        assert!(!storage.delete("a-v1").await.unwrap());
        assert!(storage.names().await.unwrap().is_empty());
    }
}
