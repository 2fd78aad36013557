//! Tile service layer.
//!
//! This module serves slippy-map tiles from a local disk cache and fills
//! misses from the upstream provider.
//!
//! # Architecture
//!
//! The tile service sits between the HTTP layer and the upstream provider:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP Handlers              │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │            TileCacheService             │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ DiskTileCache│  │   RateLimiter   │  │
//! │  │ ({z}_{x}_{y} │  │ (per client,    │  │
//! │  │   .png)      │  │  per minute)    │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              TileFetcher                │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileCacheService`]: Main entry point for tile requests
//! - [`DiskTileCache`]: Size-bounded tile files with least-recently-accessed eviction
//! - [`TileCoordinate`]: Validated `(zoom, x, y)` and its cache key
//! - [`TileRequest`]: Parameters for a tile request
//! - [`TileResponse`]: Tile bytes plus whether they came from cache
//!
//! # Example
//!
//! ```no_run
//! use tile_cache_proxy::tile::{DiskTileCache, TileCoordinate};
//! use bytes::Bytes;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = DiskTileCache::open("./tile-cache", 50 * 1024 * 1024)
//!         .await
//!         .unwrap();
//!
//!     let key = TileCoordinate::new(3, 4, 2).unwrap().cache_key();
//!
//!     if let Some(tile) = cache.try_get(&key).await {
//!         println!("Cache hit: {} bytes", tile.len());
//!     } else {
//!         cache.put(&key, Bytes::from_static(b"\x89PNG")).await.unwrap();
//!     }
//! }
//! ```

mod cache;
mod coord;
mod service;

pub use cache::{CacheEntry, DiskTileCache, DEFAULT_TILE_CACHE_CAPACITY};
pub use coord::{
    file_name_for_key, key_for, key_from_file_name, validate, TileCoordinate, MAX_ZOOM,
    TILE_FILE_EXTENSION,
};
pub use service::{TileCacheService, TileRequest, TileResponse, TILE_CONTENT_TYPE};
