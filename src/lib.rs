//! # Tile Cache Proxy
//!
//! A caching proxy for slippy-map raster tiles.
//!
//! Tiles are served from a size-bounded local disk cache; misses are fetched
//! from a configurable upstream provider and stored for later requests.
//!
//! ## Features
//!
//! - **Disk cache**: `{zoom}_{x}_{y}.png` files with least-recently-accessed eviction
//! - **Hot-link protection**: tile requests must carry a Referer header
//! - **Rate limiting**: optional fixed one-minute window per client
//! - **Fetch coalescing**: concurrent misses for one tile share a single upstream request
//! - **Hot reload**: provider settings are re-read on SIGHUP
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`tile`] - Coordinates, disk cache and the tile service
//! - [`upstream`] - Tile provider access over HTTP
//! - [`limit`] - Per-client rate limiting
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI options and provider settings
//! - [`error`] - Error types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//! use tile_cache_proxy::{
//!     create_router, DiskTileCache, HttpTileFetcher, RouterConfig, SettingsStore,
//!     TileCacheService,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = Arc::new(SettingsStore::default());
//!     let cache = DiskTileCache::open("./tile-cache", 100 * 1024 * 1024)
//!         .await
//!         .unwrap();
//!     let fetcher = HttpTileFetcher::new().unwrap();
//!
//!     let service = Arc::new(TileCacheService::new(cache, fetcher, settings));
//!     let router = create_router(service, RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(
//!         listener,
//!         router.into_make_service_with_connect_info::<SocketAddr>(),
//!     )
//!     .await
//!     .unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod limit;
pub mod server;
pub mod tile;
pub mod upstream;

// Re-export commonly used types
pub use config::{Config, ProviderSettings, SettingsStore};
pub use error::{CacheError, SettingsError, TileError, UpstreamError};
pub use limit::{RateLimitDecision, RateLimiter};
pub use server::{
    create_router, AppState, ClientKey, ErrorResponse, ForwardedForPolicy, HealthResponse,
    RouterConfig,
};
pub use tile::{
    DiskTileCache, TileCacheService, TileCoordinate, TileRequest, TileResponse,
    DEFAULT_TILE_CACHE_CAPACITY,
};
pub use upstream::{HttpTileFetcher, TileFetcher};
