//! Configuration for the site, cache, audio and front server.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::{AudioSources, DEFAULT_VOLUME};
use crate::cache::cache_name;
use crate::error::{Error, Result};
use crate::manifest::SiteBase;

/// Where the app is deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Scheme and host, e.g. `https://example.github.io`.
    pub origin: String,
    /// Sub-path the app is served under, e.g. `/bearbang101902/`.
    pub base_path: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            origin: "https://ikegamidayo.github.io".to_string(),
            base_path: "/bearbang101902/".to_string(),
        }
    }
}

impl SiteConfig {
    /// Sets the origin.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Sets the base path.
    #[must_use]
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Resolves the configured origin and base path.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin is not a valid http(s) URL.
    pub fn site_base(&self) -> Result<SiteBase> {
        SiteBase::new(&self.origin, &self.base_path)
    }
}

/// Cache naming and precache behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Name prefix shared by every version.
    pub prefix: String,
    /// Bump on deploy to re-precache and evict the previous cache.
    pub version: u32,
    /// Number of assets fetched at once during install.
    pub precache_concurrency: usize,
    /// Directory holding the caches.
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            prefix: "bearbang".to_string(),
            version: 1,
            precache_concurrency: 4,
            dir: cache_dir.join("bearbang"),
        }
    }
}

impl CacheConfig {
    /// The versioned cache name, e.g. `bearbang-v1`.
    #[must_use]
    pub fn name(&self) -> String {
        cache_name(&self.prefix, self.version)
    }

    /// Sets the cache version.
    #[must_use]
    pub const fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Sets how many assets are precached concurrently.
    #[must_use]
    pub const fn with_precache_concurrency(mut self, concurrency: usize) -> Self {
        self.precache_concurrency = concurrency;
        self
    }

    /// Sets the cache directory.
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }
}

/// The alert sound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Tried first; relative paths resolve against the site base.
    pub primary_url: String,
    /// Tried when the primary fails to load or decode.
    pub fallback_url: String,
    /// Gain used until the user sets one.
    pub default_volume: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            primary_url: "audio/repeat_bang.mp3".to_string(),
            fallback_url: "audio/repeat_bang.mp3".to_string(),
            default_volume: DEFAULT_VOLUME,
        }
    }
}

impl AudioConfig {
    /// Resolves both URLs against the site base.
    ///
    /// # Errors
    ///
    /// Returns an error if either URL is invalid.
    pub fn sources(&self, base: &SiteBase) -> Result<AudioSources> {
        Ok(AudioSources {
            primary: base.resolve(&self.primary_url)?,
            fallback: base.resolve(&self.fallback_url)?,
        })
    }
}

/// Local front server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8723,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub site: SiteConfig,
    pub cache: CacheConfig,
    pub audio: AudioConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file: `$XDG_CONFIG_HOME/bearbang/config.toml`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bearbang")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file at `path`, writing a default one first if it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created, read or parsed.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            log::info!("Created default config at {}", path.display());
            return Ok(config);
        }
        Self::load(path)
    }

    /// Writes the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string(self)?)?;
        Ok(())
    }

    /// Checks values that would only fail later.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        let base = self.site.site_base()?;
        self.audio.sources(&base)?;
        if self.cache.prefix.is_empty() || self.cache.prefix.contains(['/', '\\']) {
            return Err(Error::Config(format!(
                "cache prefix {:?} must be non-empty and contain no path separators",
                self.cache.prefix
            )));
        }
        if self.cache.precache_concurrency == 0 {
            return Err(Error::Config("precache_concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_app_config() {
        let config = AppConfig::default();
        assert_eq!(config.cache.name(), "bearbang-v1");
        assert_eq!(config.cache.precache_concurrency, 4);
        assert!((config.audio.default_volume - 0.9).abs() < f32::EPSILON);
        assert_eq!(config.server.port, 8723);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let site = SiteConfig::default()
            .with_origin("http://localhost:5173")
            .with_base_path("/");
        let cache = CacheConfig::default()
            .with_version(7)
            .with_precache_concurrency(2)
            .with_dir("/tmp/bb");

        assert_eq!(site.site_base().unwrap().url().as_str(), "http://localhost:5173/");
        assert_eq!(cache.name(), "bearbang-v7");
        assert_eq!(cache.dir, PathBuf::from("/tmp/bb"));
    }

    #[test]
    fn audio_sources_resolve_against_base() {
        let config = AppConfig::default();
        let base = config.site.site_base().unwrap();
        let sources = config.audio.sources(&base).unwrap();
        assert_eq!(
            sources.primary.as_str(),
            "https://ikegamidayo.github.io/bearbang101902/audio/repeat_bang.mp3"
        );
        assert_eq!(sources.primary, sources.fallback);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cache]\nversion = 3\n\n[server]\nport = 9000\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.cache.name(), "bearbang-v3");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.site, SiteConfig::default());
    }

    #[test]
    fn load_or_create_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = AppConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        let loaded = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(created, loaded);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(&path, "[site]\norigin = \"ftp://example.com\"\n").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(Error::InvalidUrl { .. })));

        std::fs::write(&path, "[cache]\nprefix = \"a/b\"\n").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(Error::Config(_))));

        std::fs::write(&path, "[cache]\nversion = \"one\"\n").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(Error::ConfigParse(_))));
    }

    #[test]
    fn default_path_is_under_bearbang() {
        assert!(AppConfig::default_path().ends_with("bearbang/config.toml"));
    }
}
