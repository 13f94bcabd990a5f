//! Named response caches.
//!
//! A [`CacheStorage`] holds any number of named caches, each mapping a
//! [`CacheKey`] to a stored [`AssetResponse`]. Only one of them is current for
//! a given worker version; the others are evicted on activation.

mod disk;
mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::request::{AssetResponse, CacheKey};

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;

/// Abstraction over the cache store for testability.
///
/// Implementations must make `put` atomic per key: a concurrent `lookup` sees
/// either the previous entry or the new one, never a partial write.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Creates the named cache if it does not exist. Idempotent.
    async fn open(&self, name: &str) -> Result<()>;

    /// Lists the names of all existing caches.
    async fn names(&self) -> Result<Vec<String>>;

    /// Deletes the named cache and everything in it.
    ///
    /// Returns false if no such cache existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Looks up a stored response in the named cache.
    async fn lookup(&self, name: &str, key: &CacheKey) -> Result<Option<AssetResponse>>;

    /// Stores a response in the named cache, creating the cache if needed and
    /// replacing any previous entry for the key.
    async fn put(&self, name: &str, key: &CacheKey, response: &AssetResponse) -> Result<()>;

    /// Lists the keys stored in the named cache.
    async fn keys(&self, name: &str) -> Result<Vec<CacheKey>>;
}

/// Formats the versioned cache name, e.g. `bearbang-v1`.
#[must_use]
pub fn cache_name(prefix: &str, version: u32) -> String {
    format!("{prefix}-v{version}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_name_embeds_version() {
        assert_eq!(cache_name("bearbang", 1), "bearbang-v1");
        assert_ne!(cache_name("bearbang", 1), cache_name("bearbang", 2));
    }
}
