//! Router configuration for the tile cache proxy.
//!
//! This module defines the HTTP routes and applies middleware for CORS,
//! tracing and client identification.
//!
//! # Route Structure
//!
//! ```text
//! /health                       - Health check
//! /tiles/{z}/{x}/{y}.png        - Tile endpoint (Referer required)
//! /attribution                  - Provider attribution
//! /cache/stats                  - Cache statistics
//! /cache          (DELETE)      - Clear the cache (admin only)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tile_cache_proxy::server::{create_router, RouterConfig};
//!
//! let service = Arc::new(TileCacheService::new(cache, HttpTileFetcher::new()?, settings));
//!
//! let config = RouterConfig::new()
//!     .with_cors_origins(vec!["https://maps.example.com".to_string()])
//!     .with_admin_enabled(true);
//!
//! let router = create_router(service, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{delete, get},
    Extension, Router,
};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::client::ForwardedForPolicy;
use super::handlers::{
    attribution_handler, cache_stats_handler, clear_cache_handler, health_handler, tile_handler,
    AppState,
};
use crate::config::DEFAULT_CACHE_MAX_AGE;
use crate::tile::TileCacheService;
use crate::upstream::TileFetcher;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Whether to enable request tracing
    pub enable_tracing: bool,

    /// Whether X-Forwarded-For determines the client key
    pub trust_forwarded_for: bool,

    /// Whether to mount the cache-clear endpoint
    pub admin_enabled: bool,
}

impl RouterConfig {
    /// Create a new router configuration.
    ///
    /// By default:
    /// - CORS allows any origin
    /// - Cache max-age is 1 day (86400 seconds)
    /// - Tracing is enabled
    /// - X-Forwarded-For is trusted
    /// - Admin endpoints are not mounted
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            enable_tracing: true,
            trust_forwarded_for: true,
            admin_enabled: false,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    /// Pass None (or don't call this method) to allow any origin.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    /// Set the Cache-Control max-age in seconds.
    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    /// Trust or ignore X-Forwarded-For when deriving client keys.
    pub fn with_trust_forwarded_for(mut self, trusted: bool) -> Self {
        self.trust_forwarded_for = trusted;
        self
    }

    /// Mount or hide the admin endpoints.
    pub fn with_admin_enabled(mut self, enabled: bool) -> Self {
        self.admin_enabled = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// This function builds the complete Axum router with:
/// - Tile, health, attribution and cache statistics routes
/// - The cache-clear route, when admin endpoints are enabled
/// - CORS configuration
/// - The forwarded-header policy used by the client key extractor
/// - Request tracing (optional)
///
/// Serve the result with `into_make_service_with_connect_info::<SocketAddr>()`
/// so clients without a forwarded header are keyed by peer address.
pub fn create_router<F>(tile_service: Arc<TileCacheService<F>>, config: RouterConfig) -> Router
where
    F: TileFetcher + 'static,
{
    let app_state = AppState::new(tile_service, config.cache_max_age);

    let cors = build_cors_layer(&config);

    // Uses {filename} to capture both "{y}" and "{y}.png" formats
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/tiles/{z}/{x}/{filename}", get(tile_handler::<F>))
        .route("/attribution", get(attribution_handler::<F>))
        .route("/cache/stats", get(cache_stats_handler::<F>));

    if config.admin_enabled {
        router = router.route("/cache", delete(clear_cache_handler::<F>));
    }

    let router = router
        .with_state(app_state)
        .layer(Extension(ForwardedForPolicy {
            trusted: config.trust_forwarded_for,
        }))
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let mut methods = vec![Method::GET, Method::HEAD, Method::OPTIONS];
    if config.admin_enabled {
        methods.push(Method::DELETE);
    }

    let cors = CorsLayer::new()
        .allow_methods(methods)
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
