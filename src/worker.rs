//! Cache lifecycle manager: precache on install, evict on activate, and
//! answer requests cache-first with network fallback.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::{StreamExt, stream};

use crate::cache::CacheStorage;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::manifest::AssetManifest;
use crate::request::{AssetRequest, AssetResponse, CacheKey, Method, Url};

/// Lifecycle position of a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Created, nothing cached yet.
    Parsed,
    /// Precaching is in progress.
    Installing,
    /// Precaching settled; waiting for activation.
    Installed,
    /// Stale caches are being evicted.
    Activating,
    /// Intercepting requests.
    Activated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
        };
        f.write_str(s)
    }
}

/// Trait for receiving lifecycle events.
///
/// All methods have default no-op implementations for convenience.
pub trait LifecycleObserver: Send + Sync {
    /// Called when an asset has been stored during install.
    fn on_asset_cached(&self, _url: &Url, _bytes: usize) {}

    /// Called when an asset could not be fetched or stored during install.
    fn on_asset_failed(&self, _url: &Url, _error: &str) {}

    /// Called for every stale cache deleted during activation.
    fn on_cache_evicted(&self, _name: &str) {}
}

/// A null observer that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoObserver;

impl LifecycleObserver for NoObserver {}

/// Result of a completed install.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    /// Name of the cache that was filled.
    pub cache: String,
    /// Assets stored, in manifest order.
    pub cached: Vec<Url>,
    /// Assets that failed, with the reason, in manifest order.
    pub failed: Vec<(Url, String)>,
}

impl InstallReport {
    /// Returns true if every manifest entry was stored.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// How the worker decided to handle a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The worker produced a response (from cache or network).
    Response(AssetResponse),
    /// The worker does not intercept this request; send it to the network untouched.
    Passthrough,
}

/// Owns one named cache version and the request interception policy.
pub struct CacheWorker<S: CacheStorage, F: Fetcher> {
    storage: S,
    fetcher: F,
    cache_name: String,
    manifest: AssetManifest,
    root_document: Url,
    concurrency: usize,
    state: Mutex<WorkerState>,
}

impl<S: CacheStorage, F: Fetcher> CacheWorker<S, F> {
    /// Creates a worker for the given cache version.
    ///
    /// `root_document` is served to navigation requests when the network is
    /// unreachable.
    #[must_use]
    pub fn new(
        storage: S,
        fetcher: F,
        cache_name: impl Into<String>,
        manifest: AssetManifest,
        root_document: Url,
    ) -> Self {
        Self {
            storage,
            fetcher,
            cache_name: cache_name.into(),
            manifest,
            root_document,
            concurrency: 4,
            state: Mutex::new(WorkerState::Parsed),
        }
    }

    /// Sets how many assets are precached at once.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Returns the current cache name.
    #[must_use]
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Returns the precache manifest.
    #[must_use]
    pub const fn manifest(&self) -> &AssetManifest {
        &self.manifest
    }

    /// Returns the underlying cache storage.
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Moves from `from` to `to`, failing if the worker is elsewhere.
    fn transition(&self, from: WorkerState, to: WorkerState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return Err(Error::Lifecycle(format!(
                "cannot move to {to} from {state} (expected {from})"
            )));
        }
        *state = to;
        Ok(())
    }

    /// Installs then activates this version.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be opened or the stale caches
    /// cannot be listed/deleted. Individual asset failures are not errors.
    pub async fn register(&self, observer: &dyn LifecycleObserver) -> Result<InstallReport> {
        let report = self.install(observer).await?;
        self.activate(observer).await?;
        Ok(report)
    }

    /// Opens the current cache and tries to store every manifest asset.
    ///
    /// Every attempt settles before this returns. A failed asset is logged and
    /// listed in the report; it never aborts the others.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker is not freshly created or the cache
    /// itself cannot be opened.
    pub async fn install(&self, observer: &dyn LifecycleObserver) -> Result<InstallReport> {
        self.transition(WorkerState::Parsed, WorkerState::Installing)?;
        if let Err(e) = self.storage.open(&self.cache_name).await {
            self.set_state(WorkerState::Parsed);
            return Err(e);
        }

        log::info!(
            "Installing {}: precaching {} assets",
            self.cache_name,
            self.manifest.len()
        );

        let mut results: Vec<_> = stream::iter(self.manifest.urls().iter().enumerate())
            .map(|(index, url)| async move { (index, url, self.precache_one(url).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by_key(|(index, _, _)| *index);

        let mut report = InstallReport {
            cache: self.cache_name.clone(),
            ..InstallReport::default()
        };
        for (_, url, result) in results {
            match result {
                Ok(bytes) => {
                    observer.on_asset_cached(url, bytes);
                    report.cached.push(url.clone());
                }
                Err(e) => {
                    log::error!("Failed to cache {url}: {e}");
                    observer.on_asset_failed(url, &e.to_string());
                    report.failed.push((url.clone(), e.to_string()));
                }
            }
        }

        self.set_state(WorkerState::Installed);
        log::info!(
            "Installed {}: {} cached, {} failed",
            self.cache_name,
            report.cached.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Fetches and stores one asset. Non-2xx responses count as failures.
    async fn precache_one(&self, url: &Url) -> Result<usize> {
        let request = AssetRequest::get(url.clone());
        let response = self.fetcher.fetch(&request).await?;
        if !response.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: response.status,
            });
        }
        self.storage
            .put(&self.cache_name, &request.key(), &response)
            .await?;
        Ok(response.body.len())
    }

    /// Deletes every cache whose name is not the current one.
    ///
    /// Returns the evicted names.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has not been installed, or the cache
    /// names cannot be listed or deleted.
    pub async fn activate(&self, observer: &dyn LifecycleObserver) -> Result<Vec<String>> {
        self.transition(WorkerState::Installed, WorkerState::Activating)?;

        let result = self.evict_stale(observer).await;
        match result {
            Ok(evicted) => {
                self.set_state(WorkerState::Activated);
                log::info!("Activated {}", self.cache_name);
                Ok(evicted)
            }
            Err(e) => {
                self.set_state(WorkerState::Installed);
                Err(e)
            }
        }
    }

    async fn evict_stale(&self, observer: &dyn LifecycleObserver) -> Result<Vec<String>> {
        let stale: Vec<String> = self
            .storage
            .names()
            .await?
            .into_iter()
            .filter(|name| *name != self.cache_name)
            .collect();

        for name in &stale {
            self.storage.delete(name).await?;
            log::info!("Evicted stale cache {name}");
            observer.on_cache_evicted(name);
        }
        Ok(stale)
    }

    /// Decides the response for an incoming request.
    ///
    /// Only GET requests are intercepted, and only once activated. Cache hits
    /// are returned as-is; misses go to the network and 200 responses are
    /// stored. When the network fails, navigations get the cached root
    /// document. Cache failures degrade to network-only handling.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Offline`] when the network fails and no fallback applies.
    pub async fn handle_fetch(&self, request: &AssetRequest) -> Result<FetchOutcome> {
        if request.method != Method::GET || self.state() != WorkerState::Activated {
            return Ok(FetchOutcome::Passthrough);
        }

        let key = request.key();
        match self.storage.lookup(&self.cache_name, &key).await {
            Ok(Some(cached)) => {
                log::debug!("Cache hit: {key}");
                return Ok(FetchOutcome::Response(cached));
            }
            Ok(None) => {}
            Err(e) => log::warn!("Cache lookup failed for {key}, using network: {e}"),
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.status == 200 {
                    let copy = response.clone();
                    if let Err(e) = self.storage.put(&self.cache_name, &key, &copy).await {
                        log::warn!("Failed to cache {key}: {e}");
                    }
                }
                Ok(FetchOutcome::Response(response))
            }
            Err(e) => {
                log::debug!("Network failed for {key}: {e}");
                if request.is_navigation()
                    && let Some(shell) = self.cached_root_document().await
                {
                    return Ok(FetchOutcome::Response(shell));
                }
                Err(Error::Offline {
                    url: request.url.to_string(),
                })
            }
        }
    }

    async fn cached_root_document(&self) -> Option<AssetResponse> {
        let key = CacheKey::get(&self.root_document);
        match self.storage.lookup(&self.cache_name, &key).await {
            Ok(found) => found,
            Err(e) => {
                log::warn!("Cache lookup failed for offline fallback: {e}");
                None
            }
        }
    }

    /// Like [`handle_fetch`](Self::handle_fetch), but sends passthrough
    /// requests to the network so the caller always gets a response.
    ///
    /// # Errors
    ///
    /// Returns an error if neither the cache nor the network can answer.
    pub async fn respond(&self, request: &AssetRequest) -> Result<AssetResponse> {
        match self.handle_fetch(request).await? {
            FetchOutcome::Response(response) => Ok(response),
            FetchOutcome::Passthrough => self.fetcher.fetch(request).await,
        }
    }

    /// Deletes the current cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot delete it.
    pub async fn clear(&self) -> Result<bool> {
        let deleted = self.storage.delete(&self.cache_name).await?;
        if deleted {
            log::info!("Deleted cache {}", self.cache_name);
        }
        Ok(deleted)
    }
}

/// Requests made through the worker see the cache-first policy, the same
/// way page fetches do once the worker controls them.
#[async_trait]
impl<S: CacheStorage, F: Fetcher> Fetcher for CacheWorker<S, F> {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse> {
        self.respond(request).await
    }
}
