//! HTTP server layer for the tile cache proxy.
//!
//! This module provides the HTTP API in front of
//! [`TileCacheService`](crate::tile::TileCacheService).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │               GET /tiles/{z}/{x}/{y}.png                        │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  handlers   │  │   client    │  │        routes           │  │
//! │  │ (requests)  │  │ (client key)│  │  (router config)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod handlers;
pub mod routes;

pub use client::{derive_client_key, ClientKey, ForwardedForPolicy};
pub use handlers::{
    attribution_handler, cache_stats_handler, clear_cache_handler, health_handler, tile_handler,
    AppState, AttributionResponse, CacheStatsResponse, ClearCacheResponse, ErrorResponse,
    HealthResponse, TilePathParams,
};
pub use routes::{create_router, RouterConfig};
