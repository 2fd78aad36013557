//! HTTP request handlers for the tile cache proxy.
//!
//! This module contains the Axum handlers for serving tiles and the small
//! JSON endpoints around them.
//!
//! # Endpoints
//!
//! - `GET /tiles/{z}/{x}/{y}.png` - Serve a tile
//! - `GET /health` - Health check endpoint
//! - `GET /attribution` - Provider attribution for the map UI
//! - `GET /cache/stats` - Cache size and entry count
//! - `DELETE /cache` - Clear the cache (admin only)

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{CacheError, TileError};
use crate::tile::{TileCacheService, TileRequest, TILE_FILE_EXTENSION};
use crate::upstream::TileFetcher;

use super::client::ClientKey;

/// Response header reporting whether the tile came from the disk cache.
pub const CACHE_HIT_HEADER: HeaderName = HeaderName::from_static("x-tile-cache-hit");

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the tile service.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState<F: TileFetcher> {
    /// The tile service for processing tile requests
    pub tile_service: Arc<TileCacheService<F>>,

    /// Cache-Control max-age in seconds for tile responses
    pub cache_max_age: u32,
}

impl<F: TileFetcher> AppState<F> {
    /// Create a new application state with the given tile service.
    pub fn new(tile_service: Arc<TileCacheService<F>>, cache_max_age: u32) -> Self {
        Self {
            tile_service,
            cache_max_age,
        }
    }
}

impl<F: TileFetcher> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            tile_service: Arc::clone(&self.tile_service),
            cache_max_age: self.cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters for tile requests.
///
/// Extracted from: `/tiles/{z}/{x}/{filename}` where filename is `{y}` or
/// `{y}.png`. Values are kept as strings so that malformed numbers surface as
/// invalid coordinates rather than routing failures.
#[derive(Debug, Deserialize)]
pub struct TilePathParams {
    /// Zoom level
    pub z: String,

    /// Tile column
    pub x: String,

    /// Tile row with optional .png extension (e.g., "0" or "0.png")
    pub filename: String,
}

impl TilePathParams {
    /// Raw `(zoom, x, y)` values.
    ///
    /// Unparseable components come back as `-1` so they fail validation.
    pub fn coordinates(&self) -> (i64, i64, i64) {
        let y = self
            .filename
            .strip_suffix(TILE_FILE_EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
            .unwrap_or(&self.filename);

        (
            parse_component(&self.z),
            parse_component(&self.x),
            parse_component(y),
        )
    }
}

fn parse_component(raw: &str) -> i64 {
    raw.parse().unwrap_or(-1)
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "rate_limited")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    /// Create a new error response with status code.
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
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}

/// Attribution response.
#[derive(Debug, Serialize)]
pub struct AttributionResponse {
    pub attribution: String,
}

/// Cache statistics response.
#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    /// Total size of cached tiles in bytes
    pub size_bytes: u64,

    /// Cache budget in bytes
    pub capacity_bytes: u64,

    /// Number of cached tiles
    pub entries: usize,
}

/// Response from the cache clear endpoint.
#[derive(Debug, Serialize)]
pub struct ClearCacheResponse {
    /// Number of tile files deleted
    pub deleted: usize,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert TileError to HTTP response.
///
/// Logging follows severity: 5xx at ERROR, 404 at DEBUG, other 4xx at WARN.
/// Rate-limited responses carry a `Retry-After` header in whole seconds.
impl IntoResponse for TileError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            TileError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            TileError::InvalidCoordinate { .. } => {
                (StatusCode::BAD_REQUEST, "invalid_coordinates")
            }
            TileError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            TileError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            TileError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
        };
        let message = self.to_string();

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        let mut response = (status, Json(error_response)).into_response();

        if let TileError::RateLimited { retry_after } = self {
            // Whole seconds, rounded up
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }

        response
    }
}

/// Convert CacheError to HTTP response.
///
/// Only reachable from the admin endpoint; tile requests never surface cache
/// failures.
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let message = self.to_string();

        error!(
            error_type = "cache_error",
            status = status.as_u16(),
            "Server error: {}",
            message
        );

        let error_response = ErrorResponse::with_status("cache_error", message, status);
        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle tile requests.
///
/// # Endpoint
///
/// `GET /tiles/{z}/{x}/{y}.png`
///
/// # Response
///
/// - `200 OK`: PNG tile with `Content-Type: image/png`
/// - `400 Bad Request`: Invalid coordinates
/// - `401 Unauthorized`: Missing Referer header
/// - `404 Not Found`: Provider has no such tile
/// - `429 Too Many Requests`: Client over its per-minute budget
/// - `502 Bad Gateway`: Provider failed
///
/// # Headers
///
/// - `Content-Type: image/png`
/// - `Cache-Control: public, max-age={cache_max_age}`
/// - `X-Tile-Cache-Hit: true|false`
pub async fn tile_handler<F: TileFetcher + 'static>(
    State(state): State<AppState<F>>,
    Path(params): Path<TilePathParams>,
    ClientKey(client_key): ClientKey,
    headers: HeaderMap,
) -> Result<Response, TileError> {
    let (zoom, x, y) = params.coordinates();

    let request = TileRequest::new(zoom, x, y, client_key).with_referer(has_referer(&headers));

    let response = state.tile_service.get_tile(request).await?;

    let headers = [
        (header::CONTENT_TYPE, response.content_type.to_string()),
        (
            header::CACHE_CONTROL,
            format!("public, max-age={}", state.cache_max_age),
        ),
        (CACHE_HIT_HEADER, response.cache_hit.to_string()),
    ];

    Ok((StatusCode::OK, headers, response.data).into_response())
}

fn has_referer(headers: &HeaderMap) -> bool {
    headers
        .get(header::REFERER)
        .is_some_and(|v| !v.as_bytes().iter().all(u8::is_ascii_whitespace))
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handle attribution requests.
///
/// `GET /attribution` returns `{"attribution": "..."}` from the current
/// settings.
pub async fn attribution_handler<F: TileFetcher + 'static>(
    State(state): State<AppState<F>>,
) -> Json<AttributionResponse> {
    Json(AttributionResponse {
        attribution: state.tile_service.attribution(),
    })
}

/// Handle cache statistics requests.
///
/// `GET /cache/stats`
pub async fn cache_stats_handler<F: TileFetcher + 'static>(
    State(state): State<AppState<F>>,
) -> Json<CacheStatsResponse> {
    let (size_bytes, capacity_bytes, entries) = state.tile_service.cache_stats().await;
    Json(CacheStatsResponse {
        size_bytes,
        capacity_bytes,
        entries,
    })
}

/// Handle cache clear requests.
///
/// `DELETE /cache`, mounted only when admin endpoints are enabled.
pub async fn clear_cache_handler<F: TileFetcher + 'static>(
    State(state): State<AppState<F>>,
) -> Result<Json<ClearCacheResponse>, CacheError> {
    let deleted = state.tile_service.clear_cache().await?;
    info!(deleted, "Tile cache cleared via admin endpoint");
    Ok(Json(ClearCacheResponse { deleted }))
}

// =============================================================================
// Tests
// =============================================================================
