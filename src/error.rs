//! Error types for the bearbang library.

use thiserror::Error;

/// Errors that can occur while caching assets or driving playback.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during cache or preference file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The network answered with a status that cannot be used.
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Status code returned by the server.
        status: u16,
    },

    /// The network is unreachable and no cached fallback exists.
    #[error("Network request failed and no cache available: {url}")]
    Offline {
        /// Requested URL.
        url: String,
    },

    /// A URL could not be parsed or joined onto the site base.
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The offending input.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// Audio bytes could not be decoded.
    #[error("Audio decode failed: {0}")]
    Decode(String),

    /// Neither the primary nor the fallback audio source could be loaded.
    #[error("Audio unavailable (primary: {primary}; fallback: {fallback})")]
    AudioUnavailable {
        /// Failure for the primary URL.
        primary: Box<Error>,
        /// Failure for the fallback URL.
        fallback: Box<Error>,
    },

    /// The audio output device could not be opened or driven.
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// The platform refused or does not support a wake lock.
    #[error("Wake lock error: {0}")]
    WakeLock(String),

    /// Configuration file could not be parsed.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration could not be serialized.
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// A lifecycle step was invoked out of order.
    #[error("Invalid lifecycle transition: {0}")]
    Lifecycle(String),

    /// Invalid configuration or command-line input.
    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Returns true if this error means the network could not be reached at all,
    /// as opposed to the server answering with an error.
    #[must_use]
    pub fn is_network(&self) -> bool {
        match self {
            Self::Http(e) => e.status().is_none(),
            Self::Offline { .. } => true,
            _ => false,
        }
    }
}

/// A specialized `Result` type for bearbang operations.
pub type Result<T> = std::result::Result<T, Error>;
