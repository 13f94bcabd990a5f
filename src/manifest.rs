//! The fixed list of assets precached on install.

use crate::error::{Error, Result};
use crate::request::Url;

/// Assets precached for offline use, relative to the site base.
///
/// The empty entry is the root document. Paths with spaces are kept
/// percent-encoded so they match the URLs pages actually request.
pub const PRECACHE_ASSETS: &[&str] = &[
    "",
    "index.html",
    "manifest.webmanifest",
    "src/style.css",
    "images/bear%20logo.png",
    "icons/bear%20icon.png",
    "audio/repeat_bang.mp3",
];

/// Document served to navigations when the network is unreachable.
pub const ROOT_DOCUMENT: &str = "index.html";

/// Origin plus deployment base path, e.g. `https://example.github.io/bearbang/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteBase {
    base: Url,
}

impl SiteBase {
    /// Builds the base from an origin and a base path.
    ///
    /// The base path is normalised to start and end with `/`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the origin is not an absolute http(s) URL.
    pub fn new(origin: &str, base_path: &str) -> Result<Self> {
        let origin_url = Url::parse(origin).map_err(|e| Error::InvalidUrl {
            url: origin.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(origin_url.scheme(), "http" | "https") {
            return Err(Error::InvalidUrl {
                url: origin.to_string(),
                reason: "origin must be http or https".to_string(),
            });
        }

        let trimmed = base_path.trim_matches('/');
        let path = if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("/{trimmed}/")
        };
        let mut base = origin_url;
        base.set_path(&path);
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self { base })
    }

    /// Returns the base URL (always ends with `/`).
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.base
    }

    /// Returns the base path component, e.g. `/bearbang/`.
    #[must_use]
    pub fn path(&self) -> &str {
        self.base.path()
    }

    /// Resolves an asset path against the base.
    ///
    /// Absolute `http(s)` URLs are returned unchanged. A leading `/` is taken
    /// as relative to the base path rather than the origin root, so manifests
    /// written for a root deployment keep working under a sub-path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the result is not a valid URL.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        let resolved = if path.starts_with("http://") || path.starts_with("https://") {
            Url::parse(path)
        } else {
            self.base.join(path.trim_start_matches('/'))
        };
        resolved.map_err(|e| Error::InvalidUrl {
            url: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Returns the root document URL used as the offline navigation fallback.
    ///
    /// # Errors
    ///
    /// Returns an error only if the base itself cannot be joined.
    pub fn root_document(&self) -> Result<Url> {
        self.resolve(ROOT_DOCUMENT)
    }
}

/// Ordered list of absolute URLs to precache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
    urls: Vec<Url>,
}

impl AssetManifest {
    /// Resolves each entry against the base, keeping order.
    ///
    /// # Errors
    ///
    /// Returns the first entry that does not resolve to a valid URL.
    pub fn resolve<S: AsRef<str>>(base: &SiteBase, entries: &[S]) -> Result<Self> {
        let urls = entries
            .iter()
            .map(|e| base.resolve(e.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { urls })
    }

    /// The built-in asset list resolved against `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if the base cannot be joined.
    pub fn builtin(base: &SiteBase) -> Result<Self> {
        Self::resolve(base, PRECACHE_ASSETS)
    }

    /// Creates a manifest from already absolute URLs.
    #[must_use]
    pub const fn from_urls(urls: Vec<Url>) -> Self {
        Self { urls }
    }

    #[must_use]
    pub fn urls(&self) -> &[Url] {
        &self.urls
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}
