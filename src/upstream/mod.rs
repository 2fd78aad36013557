//! Upstream tile provider access.
//!
//! The tile service depends only on the [`TileFetcher`] trait, so tests and
//! alternative transports can stand in for the HTTP provider.
//!
//! ```text
//! ┌──────────────────┐   fetch(settings, coord)   ┌──────────────────────┐
//! │ TileCacheService │ ─────────────────────────▶ │   dyn TileFetcher    │
//! └──────────────────┘                            └──────────┬───────────┘
//!                                                            │
//!                                                            ▼
//!                                                 ┌──────────────────────┐
//!                                                 │   HttpTileFetcher    │
//!                                                 │ (reqwest, 1 attempt) │
//!                                                 └──────────────────────┘
//! ```

mod fetcher;

pub use fetcher::{build_tile_url, HttpTileFetcher, TileFetcher};
