//! HTTP request handlers.
//!
//! # Endpoints
//!
//! - `GET /{*source}?<params>` - Serve a derived image
//! - `GET /health` - Health check
//! - `GET <stats-path>` - Peer group statistics
//! - `GET /_peercache/{name}/{key}` - Peer lookups

use std::sync::Arc;

use axum::{
    extract::{Path, RawQuery, State},
    response::{IntoResponse, Response},
    Json,
};
use http::{header, HeaderMap, StatusCode};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::cache::{ParamsHashKeyGenerator, PeerCache};
use crate::chain::ImageServer;
use crate::error::{ProcessError, ServerError};
use crate::model::Format;

use super::query::parse_params;

// =============================================================================
// Application State
// =============================================================================

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Outermost node of the serving chain
    pub server: Arc<dyn ImageServer>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Peer group store, when that tier is active
    pub peer_cache: Option<Arc<PeerCache>>,
}

impl AppState {
    pub fn new(server: Arc<dyn ImageServer>) -> Self {
        Self {
            server,
            cache_max_age: crate::config::DEFAULT_CACHE_MAX_AGE,
            peer_cache: None,
        }
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_peer_cache(mut self, peer_cache: Option<Arc<PeerCache>>) -> Self {
        self.peer_cache = peer_cache;
        self
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_param")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }

    fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// =============================================================================
// Error Handling
// =============================================================================

/// Status code and error type identifier for a chain error.
fn classify(err: &ServerError) -> (StatusCode, &'static str) {
    match err {
        ServerError::SourceNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        ServerError::InvalidParam { .. } => (StatusCode::BAD_REQUEST, "invalid_param"),
        ServerError::Source(_) => (StatusCode::BAD_GATEWAY, "source_error"),
        ServerError::Processing(_) => (StatusCode::INTERNAL_SERVER_ERROR, "processing_error"),
        ServerError::ExternalTool(_) => (StatusCode::INTERNAL_SERVER_ERROR, "external_tool_error"),
        ServerError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
        ServerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

/// Wrapper turning chain errors into JSON error responses.
///
/// 5xx errors are logged at ERROR, 404 at DEBUG and other 4xx at WARN.
#[derive(Debug)]
pub struct HandlerError(pub ServerError);

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let (status, error_type) = classify(&self.0);
        let message = self.0.to_string();

        if status.is_server_error() {
            error!(error = %message, status = status.as_u16(), "request failed");
        } else if status == StatusCode::NOT_FOUND {
            debug!(error = %message, "not found");
        } else {
            warn!(error = %message, status = status.as_u16(), "bad request");
        }

        ErrorResponse::with_status(error_type, message, status).into_response_with(status)
    }
}

impl From<ServerError> for HandlerError {
    fn from(err: ServerError) -> Self {
        HandlerError(err)
    }
}

impl From<ProcessError> for HandlerError {
    fn from(err: ProcessError) -> Self {
        HandlerError(err.into())
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle derived image requests.
///
/// # Endpoint
///
/// `GET /{*source}?<params>`
///
/// # Response
///
/// - `200 OK`: the derived image
/// - `304 Not Modified`: `If-None-Match` matched the ETag
/// - `400 Bad Request`: malformed or invalid parameter
/// - `404 Not Found`: unknown source
/// - `502 Bad Gateway`: the source could not be fetched
/// - `500 Internal Server Error`: processing or cache failure
///
/// # Headers
///
/// - `Content-Type: image/<format>`
/// - `ETag: "<params hash>"`
/// - `Cache-Control: public, max-age={cache_max_age}`
pub async fn image_handler(
    State(state): State<AppState>,
    Path(source): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, HandlerError> {
    let params = parse_params(&source, query.as_deref())?;
    let etag = format!("\"{}\"", ParamsHashKeyGenerator::hash(&params));
    let cache_control = format!("public, max-age={}", state.cache_max_age);

    if etag_matches(&headers, &etag) {
        debug!(source = %source, "etag matched");
        return Ok((
            StatusCode::NOT_MODIFIED,
            [(header::ETAG, etag), (header::CACHE_CONTROL, cache_control)],
        )
            .into_response());
    }

    // The derivation runs in its own task so it completes (and fills the
    // caches) even if the client goes away.
    let server = state.server.clone();
    let image = tokio::spawn(async move { server.get(&params).await })
        .await
        .map_err(|e| ServerError::Internal(format!("derivation task failed: {}", e)))??;

    let content_type = Format::parse(&image.format)
        .map(Format::mime_type)
        .unwrap_or("application/octet-stream");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::ETAG, etag),
            (header::CACHE_CONTROL, cache_control),
        ],
        image.data,
    )
        .into_response())
}

/// Whether an `If-None-Match` header lists `etag` (or `*`).
fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|tag| tag.trim().trim_start_matches("W/"))
        .any(|tag| tag == etag || tag == "*")
}

/// Handle health check requests.
///
/// `GET /health` returns `{"status": "healthy", "version": "..."}`.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Browsers ask for this on every page; there is no such source.
pub async fn favicon_handler() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Serve the peer group statistics as pretty JSON.
///
/// `503 Service Unavailable` when the peer tier is not active.
pub async fn stats_handler(State(state): State<AppState>) -> Response {
    let Some(peer) = state.peer_cache.as_ref() else {
        return ErrorResponse::with_status(
            "unavailable",
            "peer cache is not enabled",
            StatusCode::SERVICE_UNAVAILABLE,
        )
        .into_response_with(StatusCode::SERVICE_UNAVAILABLE);
    };

    match serde_json::to_string_pretty(&peer.stats().await) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => HandlerError(ServerError::Internal(e.to_string())).into_response(),
    }
}

/// The peer cache addressed by `name`, if it is this node's group.
fn peer_for(state: &AppState, name: &str) -> Option<Arc<PeerCache>> {
    state
        .peer_cache
        .as_ref()
        .filter(|peer| peer.name() == name)
        .cloned()
}

/// `GET /_peercache/{name}/{key}`: answer a peer's lookup.
pub async fn peer_get_handler(
    State(state): State<AppState>,
    Path((name, key)): Path<(String, String)>,
) -> Response {
    let Some(peer) = peer_for(&state, &name) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match peer.serve_get(&key).await {
        Some(image) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            image.to_bytes(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// =============================================================================
// Tests
// =============================================================================
