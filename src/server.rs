//! Local HTTP front that answers every request through the cache worker.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::ACCEPT;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheStorage;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::manifest::SiteBase;
use crate::request::{AssetRequest, AssetResponse, RequestMode};
use crate::worker::CacheWorker;

/// Largest request body forwarded upstream.
const MAX_BODY: usize = 16 * 1024 * 1024;

pub const HEALTH_PATH: &str = "/__bearbang/health";

struct AppState<S: CacheStorage, F: Fetcher> {
    worker: Arc<CacheWorker<S, F>>,
    site: SiteBase,
}

impl<S: CacheStorage, F: Fetcher> Clone for AppState<S, F> {
    fn clone(&self) -> Self {
        Self {
            worker: Arc::clone(&self.worker),
            site: self.site.clone(),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    cache: String,
    state: String,
}

async fn api_health<S, F>(State(state): State<AppState<S, F>>) -> impl IntoResponse
where
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    axum::Json(HealthResponse {
        status: "ok".to_string(),
        cache: state.worker.cache_name().to_string(),
        state: state.worker.state().to_string(),
    })
}

async fn front<S, F>(State(state): State<AppState<S, F>>, request: Request) -> Response
where
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY).await {
        Ok(body) => body,
        Err(e) => return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response(),
    };
    let asset = asset_request(&state.site, parts.method, &parts.uri, parts.headers).with_body(body);

    match state.worker.respond(&asset).await {
        Ok(response) => into_response(response),
        Err(e) => {
            log::warn!("{} {}: {e}", asset.method, asset.url);
            error_response(&e)
        }
    }
}

/// Returns true for top-level document loads.
///
/// `Sec-Fetch-Mode` decides when present; older clients are recognised by a
/// GET that accepts HTML.
fn is_navigation(method: &Method, headers: &HeaderMap) -> bool {
    if let Some(mode) = headers.get("sec-fetch-mode") {
        return mode.as_bytes().eq_ignore_ascii_case(b"navigate");
    }
    *method == Method::GET
        && headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/html"))
}

/// Maps an incoming request onto the site origin.
fn asset_request(site: &SiteBase, method: Method, uri: &Uri, headers: HeaderMap) -> AssetRequest {
    // The path is set rather than joined so `//host/...` cannot leave the origin.
    let mut url = site.url().clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    url.set_fragment(None);
    let mode = if is_navigation(&method, &headers) {
        RequestMode::Navigate
    } else {
        RequestMode::Subresource
    };
    let mut request = AssetRequest::get(url).with_method(method).with_headers(headers);
    request.mode = mode;
    request
}

fn into_response(asset: AssetResponse) -> Response {
    let status = StatusCode::from_u16(asset.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::new(Body::from(asset.body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for (name, value) in &asset.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    response
}

fn error_response(error: &Error) -> Response {
    let status = match error {
        Error::Offline { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, error.to_string()).into_response()
}

/// Builds the router: the health endpoint, and the worker for everything else.
pub fn router<S, F>(worker: Arc<CacheWorker<S, F>>, site: SiteBase) -> Router
where
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    Router::new()
        .route(HEALTH_PATH, get(api_health::<S, F>))
        .fallback(front::<S, F>)
        .with_state(AppState { worker, site })
}

/// Serves on an already bound listener until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve<S, F>(
    listener: TcpListener,
    worker: Arc<CacheWorker<S, F>>,
    site: SiteBase,
    shutdown: CancellationToken,
) -> Result<()>
where
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    let app = router(worker, site);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Binds `host:port` and serves until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the address is invalid or cannot be bound.
pub async fn run_server<S, F>(
    worker: Arc<CacheWorker<S, F>>,
    site: SiteBase,
    host: &str,
    port: u16,
    shutdown: CancellationToken,
) -> Result<()>
where
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| Error::Config(format!("invalid bind address {host}:{port}: {e}")))?;
    let listener = TcpListener::bind(addr).await?;
    log::info!("Serving {} on http://{addr}", site.url());
    serve(listener, worker, site, shutdown).await
}
