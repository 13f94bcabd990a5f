//! Cache storage persisted under a directory, one subdirectory per cache.
//!
//! Each entry is a `<sha256>.toml` metadata file pointing at a uniquely named
//! body file. Bodies are written first and the metadata is swapped in with a
//! rename, so readers never observe a half-written entry.
//!
//! A cache directory carries a marker file. Directories without it are never
//! listed or deleted, so the root may be shared with unrelated data.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::CacheStorage;
use crate::error::{Error, Result};
use crate::request::{AssetResponse, CacheKey};

/// Marker file present in every directory this storage created.
const MARKER: &str = ".bearbang-cache";

/// Unreferenced bodies younger than this may belong to a put in progress.
const ORPHAN_AGE: Duration = Duration::from_secs(60);

/// Number of locks puts are spread over, chosen by entry name.
const WRITE_STRIPES: usize = 16;

/// On-disk metadata for one stored response.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    method: String,
    url: String,
    status: u16,
    body_file: String,
    stored_at: DateTime<Utc>,
    headers: Vec<(String, String)>,
}

impl EntryMeta {
    fn key(&self) -> CacheKey {
        CacheKey::new(&self.method, &self.url)
    }
}

/// Cache storage rooted at a directory.
///
/// Clones share write locks, so puts for one key through any clone are
/// serialised. Writers in other processes are not; their leftovers are swept
/// by [`CacheStorage::keys`].
#[derive(Debug, Clone)]
pub struct DiskCacheStorage {
    root: PathBuf,
    writes: Arc<[Mutex<()>; WRITE_STRIPES]>,
}

impl DiskCacheStorage {
    /// Creates a storage rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writes: Arc::new(std::array::from_fn(|_| Mutex::new(()))),
        }
    }

    fn write_lock(&self, stem: &str) -> &Mutex<()> {
        let stripe = stem
            .get(..2)
            .and_then(|hex| usize::from_str_radix(hex, 16).ok())
            .unwrap_or(0);
        &self.writes[stripe % WRITE_STRIPES]
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache_dir(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\'])
        {
            return Err(Error::Config(format!("invalid cache name: {name:?}")));
        }
        Ok(self.root.join(name))
    }

    /// Creates the cache directory and its marker if missing.
    async fn ensure_cache_dir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.cache_dir(name)?;
        tokio::fs::create_dir_all(&dir).await?;
        let marker = dir.join(MARKER);
        if !tokio::fs::try_exists(&marker).await? {
            tokio::fs::write(&marker, name).await?;
        }
        Ok(dir)
    }

    async fn read_meta(path: &Path) -> Result<Option<EntryMeta>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(toml::from_str(&contents)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// File stem for a key: hex SHA-256 of `"METHOD url"`.
fn entry_stem(key: &CacheKey) -> String {
    format!("{:x}", Sha256::digest(key.to_string().as_bytes()))
}

/// Writes `contents` to `path` via a temporary file and rename.
async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp_path, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}

/// Removes body files no metadata points at.
///
/// Concurrent puts for one key each write a body, and only the last rename of
/// the metadata wins. The other bodies are left behind until swept here.
/// A body whose metadata has not been renamed in yet is recent, so only files
/// older than a minute are removed.
async fn remove_orphan_bodies(referenced: &HashSet<String>, bodies: Vec<PathBuf>) {
    for path in bodies {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if referenced.contains(file_name) {
            continue;
        }
        let stale = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified.elapsed().is_ok_and(|age| age >= ORPHAN_AGE),
            Err(_) => false,
        };
        if stale {
            log::debug!("Removing orphaned body {}", path.display());
            let _ = tokio::fs::remove_file(&path).await;
        }
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        self.ensure_cache_dir(name).await?;
        Ok(())
    }

    async fn names(&self) -> Result<Vec<String>> {
        let mut read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            if entry.file_type().await?.is_dir()
                && tokio::fs::try_exists(entry.path().join(MARKER)).await?
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let dir = self.cache_dir(name)?;
        if !tokio::fs::try_exists(dir.join(MARKER)).await? {
            if tokio::fs::try_exists(&dir).await? {
                log::warn!("Not deleting {}: not a bearbang cache", dir.display());
            }
            return Ok(false);
        }
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn lookup(&self, name: &str, key: &CacheKey) -> Result<Option<AssetResponse>> {
        let dir = self.cache_dir(name)?;
        let meta_path = dir.join(format!("{}.toml", entry_stem(key)));
        let Some(meta) = Self::read_meta(&meta_path).await? else {
            return Ok(None);
        };
        if meta.key() != *key {
            // SHA-256 collision or a foreign file; treat as a miss.
            return Ok(None);
        }

        let body = match tokio::fs::read(dir.join(&meta.body_file)).await {
            Ok(body) => Bytes::from(body),
            // Replaced by a concurrent put between the two reads.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(AssetResponse {
            status: meta.status,
            headers: meta.headers,
            body,
        }))
    }

    async fn put(&self, name: &str, key: &CacheKey, response: &AssetResponse) -> Result<()> {
        let dir = self.ensure_cache_dir(name).await?;

        let stem = entry_stem(key);
        let _guard = self.write_lock(&stem).lock().await;
        let meta_path = dir.join(format!("{stem}.toml"));
        let previous = Self::read_meta(&meta_path).await.ok().flatten();

        let body_file = format!("{stem}-{}.body", uuid::Uuid::new_v4());
        write_atomic(&dir.join(&body_file), &response.body).await?;

        let meta = EntryMeta {
            method: key.method.clone(),
            url: key.url.clone(),
            status: response.status,
            body_file,
            stored_at: Utc::now(),
            headers: response.headers.clone(),
        };
        write_atomic(&meta_path, toml::to_string(&meta)?.as_bytes()).await?;

        if let Some(previous) = previous {
            let _ = tokio::fs::remove_file(dir.join(previous.body_file)).await;
        }
        Ok(())
    }

    async fn keys(&self, name: &str) -> Result<Vec<CacheKey>> {
        let mut read_dir = match tokio::fs::read_dir(self.cache_dir(name)?).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        let mut referenced = HashSet::new();
        let mut bodies = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => {
                    if let Some(meta) = Self::read_meta(&path).await? {
                        keys.push(meta.key());
                        referenced.insert(meta.body_file);
                    }
                }
                Some("body") => bodies.push(path),
                _ => {}
            }
        }
        remove_orphan_bodies(&referenced, bodies).await;
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(url: &str) -> CacheKey {
        CacheKey::new("GET", url)
    }

    #[tokio::test]
    async fn put_then_lookup_round_trips_headers() {
        let dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        let res = AssetResponse::new(200, "body { color: red }").with_header("Content-Type", "text/css");

        storage.put("bb-v1", &key("https://x/style.css"), &res).await.unwrap();
        let hit = storage.lookup("bb-v1", &key("https://x/style.css")).await.unwrap();
        assert_eq!(hit, Some(res));
    }

    #[tokio::test]
    async fn missing_cache_and_key_are_misses() {
        let dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path().join("not-yet"));
        assert!(storage.names().await.unwrap().is_empty());
        assert!(storage.keys("bb-v1").await.unwrap().is_empty());
        assert!(storage.lookup("bb-v1", &key("https://x/")).await.unwrap().is_none());
        assert!(!storage.delete("bb-v1").await.unwrap());
    }

    #[tokio::test]
    async fn overwrite_removes_previous_body() {
        let dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        storage.put("bb-v1", &key("https://x/a"), &AssetResponse::new(200, "one")).await.unwrap();
        storage.put("bb-v1", &key("https://x/a"), &AssetResponse::new(200, "two")).await.unwrap();

        let hit = storage.lookup("bb-v1", &key("https://x/a")).await.unwrap().unwrap();
        assert_eq!(hit.body.as_ref(), b"two");

        let bodies = std::fs::read_dir(dir.path().join("bb-v1"))
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == "body")
            })
            .count();
        assert_eq!(bodies, 1);
    }

    #[tokio::test]
    async fn names_keys_and_delete() {
        let dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        storage.open("bb-v1").await.unwrap();
        storage.open("bb-v2").await.unwrap();
        storage.put("bb-v2", &key("https://x/b"), &AssetResponse::new(200, "b")).await.unwrap();
        storage.put("bb-v2", &key("https://x/a"), &AssetResponse::new(200, "a")).await.unwrap();

        assert_eq!(storage.names().await.unwrap(), vec!["bb-v1", "bb-v2"]);
        assert_eq!(
            storage.keys("bb-v2").await.unwrap(),
            vec![key("https://x/a"), key("https://x/b")]
        );

        assert!(storage.delete("bb-v1").await.unwrap());
        assert_eq!(storage.names().await.unwrap(), vec!["bb-v2"]);
    }

    fn body_files(dir: &Path) -> Vec<String> {
        let mut bodies: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".body"))
            .collect();
        bodies.sort();
        bodies
    }

    #[tokio::test]
    async fn foreign_directories_are_neither_listed_nor_deleted() {
        let dir = TempDir::new().unwrap();
        let photos = dir.path().join("my-photos");
        std::fs::create_dir_all(&photos).unwrap();
        std::fs::write(photos.join("a.jpg"), b"jpeg").unwrap();

        let storage = DiskCacheStorage::new(dir.path());
        storage.open("bb-v1").await.unwrap();
        storage.put("bb-v2", &key("https://x/a"), &AssetResponse::new(200, "a")).await.unwrap();

        assert_eq!(storage.names().await.unwrap(), vec!["bb-v1", "bb-v2"]);
        assert!(!storage.delete("my-photos").await.unwrap());
        assert!(photos.join("a.jpg").exists());
    }

    #[tokio::test]
    async fn concurrent_puts_leave_one_body() {
        let dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        let k = key("https://x/a");
        let one = AssetResponse::new(200, "one");
        let two = AssetResponse::new(200, "two");

        let (a, b) = tokio::join!(storage.put("bb-v1", &k, &one), storage.put("bb-v1", &k, &two));
        a.unwrap();
        b.unwrap();

        let hit = storage.lookup("bb-v1", &k).await.unwrap().unwrap();
        assert!(hit.body.as_ref() == b"one" || hit.body.as_ref() == b"two");
        assert_eq!(body_files(&dir.path().join("bb-v1")).len(), 1);
    }

    #[tokio::test]
    async fn keys_sweeps_old_unreferenced_bodies() {
        let dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        storage.put("bb-v1", &key("https://x/a"), &AssetResponse::new(200, "a")).await.unwrap();
        let cache = dir.path().join("bb-v1");
        let kept = body_files(&cache);

        let old = cache.join("deadbeef-old.body");
        let fresh = cache.join("deadbeef-fresh.body");
        std::fs::write(&old, b"lost").unwrap();
        std::fs::write(&fresh, b"in flight").unwrap();
        let past = std::time::SystemTime::now() - Duration::from_secs(600);
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(past)
            .unwrap();

        assert_eq!(storage.keys("bb-v1").await.unwrap(), vec![key("https://x/a")]);
        assert!(!old.exists());
        assert!(fresh.exists());
        for body in kept {
            assert!(cache.join(body).exists());
        }
    }

    #[tokio::test]
    async fn rejects_path_like_cache_names() {
        let dir = TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        assert!(matches!(storage.open("../escape").await, Err(Error::Config(_))));
        assert!(matches!(storage.open("").await, Err(Error::Config(_))));
    }
}
