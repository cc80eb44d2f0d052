//! HTTP interface of the shared cache store.
//!
//! - `GET /cache/v1/{key}` returns the stored gzip entry, or 404.
//! - `PUT /cache/v1/{key}` accepts a gzip entry after, in this order:
//!   store configured (404), authorization (403), rate limit (429), key
//!   syntax (400), declared `Content-Length` (413, body unread), bounded body
//!   read (413), bounded decompression (413), validation (400), key match
//!   (400) and freshness (400).

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;

use crate::codec::{decode_json_limited, encode_entry};
use crate::config::StoreConfig;
use crate::error::LoctrailError;
use crate::freshness::HeadVerifier;
use crate::ratelimit::RateLimiter;
use crate::repo_url::{is_valid_cache_key, RepoCoordinates};
use crate::store::CacheStore;
use crate::validate::parse_entry;

/// Shared state of the store service.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    /// `None` when no store is configured for this deployment
    store: Option<CacheStore>,
    config: StoreConfig,
    limiter: RateLimiter,
    verifier: Arc<dyn HeadVerifier>,
}

impl AppState {
    pub fn new(
        config: StoreConfig,
        store: Option<CacheStore>,
        verifier: Arc<dyn HeadVerifier>,
    ) -> Self {
        let limiter = RateLimiter::new(config.rate_limit, config.rate_window);
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                limiter,
                verifier,
            }),
        }
    }
}

/// A rejection carrying its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<LoctrailError> for ApiError {
    fn from(err: LoctrailError) -> Self {
        let status = match &err {
            LoctrailError::Validation(_) | LoctrailError::Freshness(_) | LoctrailError::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            LoctrailError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %err, "store request failed");
        }
        ApiError::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// The store service's routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/cache/v1/{key}", get(read_entry).put(write_entry))
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> crate::Result<()> {
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

fn store(state: &AppState) -> ApiResult<&CacheStore> {
    state
        .inner
        .store
        .as_ref()
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "cache store not configured"))
}

async fn read_entry(State(state): State<AppState>, Path(key): Path<String>) -> ApiResult<Response> {
    let store = store(&state)?;
    if !is_valid_cache_key(&key) {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "not found"));
    }

    let data = store
        .read(&key)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "not found"))?;

    let max_age = state.inner.config.cache_max_age.as_secs();
    let cache_control = HeaderValue::from_str(&format!("public, max-age={}", max_age))
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (header::CONTENT_ENCODING, HeaderValue::from_static("gzip")),
            (header::CACHE_CONTROL, cache_control),
        ],
        data,
    )
        .into_response())
}

fn authorized(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|given| given.trim() == token)
}

fn origin(request: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());
        if let Some(hop) = forwarded {
            return hop.to_string();
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

async fn write_entry(
    State(state): State<AppState>,
    Path(key): Path<String>,
    request: Request,
) -> ApiResult<(StatusCode, String)> {
    let store = store(&state)?;
    let config = &state.inner.config;

    if let Some(token) = &config.write_token {
        if !authorized(request.headers(), token) {
            return Err(ApiError::new(StatusCode::FORBIDDEN, "write not authorized"));
        }
    }

    let origin = origin(&request, config.trust_forwarded_for);
    if !state.inner.limiter.check(&origin) {
        return Err(ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "write rate limit exceeded",
        ));
    }

    if !is_valid_cache_key(&key) {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "malformed cache key"));
    }

    let too_large = || {
        ApiError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("compressed body exceeds {} bytes", config.max_compressed_bytes),
        )
    };
    if declared_length(request.headers()).is_some_and(|len| len > config.max_compressed_bytes) {
        return Err(too_large());
    }
    let limit = usize::try_from(config.max_compressed_bytes).unwrap_or(usize::MAX);
    let body: Bytes = axum::body::to_bytes(request.into_body(), limit)
        .await
        .map_err(|_| too_large())?;

    let value = decode_json_limited(&body, config.max_decompressed_bytes)?;
    let entry = parse_entry(value, config.max_days)?;

    let coordinates = RepoCoordinates::parse(&entry.repo_url).map_err(LoctrailError::from)?;
    if coordinates.cache_key() != key {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "repoUrl does not hash to the requested key",
        ));
    }

    if let Err(e) = state
        .inner
        .verifier
        .verify(&coordinates, &entry.head_commit)
        .await
    {
        tracing::warn!(repo = %coordinates.normalized(), head = %entry.head_commit, error = %e, "rejected stale or unverifiable entry");
        return Err(e.into());
    }

    let encoded = encode_entry(&entry)?;
    store.write(&key, Bytes::from(encoded)).await?;
    tracing::info!(
        repo = %coordinates.normalized(),
        head = %entry.head_commit,
        days = entry.result.days.len(),
        "stored cache entry"
    );

    Ok((StatusCode::OK, format!("stored {}\n", entry.head_commit)))
}
