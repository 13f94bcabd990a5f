//! bearbang - an offline-capable alert looper.
//!
//! The crate has three cooperating parts:
//!
//! - a cache lifecycle manager ([`CacheWorker`]) that precaches a fixed asset
//!   list, evicts stale cache versions, and answers requests cache-first;
//! - an audio pipeline ([`AudioSession`]) that loads one alert with a
//!   primary/fallback URL, loops it gaplessly, and persists the volume;
//! - a wake lock manager ([`WakeLockManager`]) tied to playback.
//!
//! [`Controller`] binds them to start/stop/test/volume controls, and
//! [`server`] exposes the worker as a local HTTP front.
//!
//! # Example
//!
//! ```no_run
//! use bearbang::{AppConfig, AssetManifest, CacheWorker, DiskCacheStorage, HttpFetcher, NoObserver};
//!
//! # async fn example() -> bearbang::Result<()> {
//! let config = AppConfig::default();
//! let site = config.site.site_base()?;
//!
//! let worker = CacheWorker::new(
//!     DiskCacheStorage::new(&config.cache.dir),
//!     HttpFetcher::new()?,
//!     config.cache.name(),
//!     AssetManifest::builtin(&site)?,
//!     site.root_document()?,
//! );
//!
//! // Install, then evict every other cache version
//! let report = worker.register(&NoObserver).await?;
//! println!("{} cached, {} failed", report.cached.len(), report.failed.len());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod audio;
pub mod best_effort;
pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod prefs;
pub mod request;
pub mod server;
pub mod wake;
pub mod worker;

// Re-export main types for convenience
pub use audio::{AudioSession, AudioSources, DEFAULT_VOLUME};
pub use best_effort::BestEffort;
pub use cache::{CacheStorage, DiskCacheStorage, MemoryCacheStorage};
pub use config::AppConfig;
pub use controller::{ButtonState, Controller, Readiness};
pub use error::{Error, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use manifest::{AssetManifest, SiteBase};
pub use prefs::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use request::{AssetRequest, AssetResponse, CacheKey};
pub use wake::{InhibitProvider, NoWakeLock, Visibility, WakeLockManager, WakeLockProvider};
pub use worker::{CacheWorker, FetchOutcome, InstallReport, LifecycleObserver, NoObserver, WorkerState};
