//! Network access abstraction for testability.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HOST, HeaderMap};

use crate::error::Result;
use crate::request::{AssetRequest, AssetResponse, is_hop_by_hop};

/// Performs real network fetches.
///
/// An `Err` means the network could not produce a response at all. Error
/// statuses (404, 500, ...) are still `Ok`: deciding whether a status is
/// usable is left to the caller.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Sends the request and buffers the whole response body.
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse> {
        (**self).fetch(request).await
    }
}

/// Builds a configured HTTP client for asset requests.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn build_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(8)
        .tcp_keepalive(Duration::from_secs(30))
        .build()
}

/// Default fetcher backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher with the default client settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_http_client()?,
        })
    }

    /// Creates a fetcher around an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Copies end-to-end headers; the client sets its own `Host` and framing.
fn forwardable(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| **name != HOST && !is_hop_by_hop(name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse> {
        let res = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(forwardable(&request.headers))
            .body(request.body.clone())
            .send()
            .await?;

        let status = res.status().as_u16();
        let mut response = AssetResponse::new(status, bytes::Bytes::new());
        for (name, value) in res.headers() {
            if let Ok(value) = value.to_str() {
                response = response.with_header(name.as_str(), value);
            }
        }
        response.body = res.bytes().await?;
        log::debug!("{} {} -> {status}", request.method, request.url);
        Ok(response)
    }
}
