//! Tile Cache Service for orchestrating tile requests.
//!
//! The TileCacheService is the single entry point used by the HTTP layer. It
//! runs the cheapest checks first and only touches the network on a miss:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       TileCacheService                          │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                      get_tile()                         │    │
//! │  │  1. Referer present?     4. Disk cache lookup           │    │
//! │  │  2. Validate coordinate  5. Fetch upstream (coalesced)  │    │
//! │  │  3. Rate limit           6. Store (best effort) & return│    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │        │                  │                    │                │
//! │        ▼                  ▼                    ▼                │
//! │  ┌─────────────┐  ┌───────────────┐  ┌────────────────────┐     │
//! │  │ RateLimiter │  │ DiskTileCache │  │ dyn TileFetcher    │     │
//! │  └─────────────┘  └───────────────┘  └────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Concurrent misses for the same key share one upstream fetch. The fetch and
//! the cache write run in a spawned task, so a client that disconnects
//! mid-fetch still leaves the tile cached for the next request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::{ProviderSettings, SettingsStore};
use crate::error::{CacheError, TileError, UpstreamError};
use crate::limit::{RateLimitDecision, RateLimiter};
use crate::upstream::TileFetcher;

use super::cache::DiskTileCache;
use super::coord::TileCoordinate;

/// Content type of every tile response.
pub const TILE_CONTENT_TYPE: &str = "image/png";

/// Shared result of one upstream fetch.
type FetchCell = OnceCell<Result<Bytes, UpstreamError>>;

/// Fetches in progress, keyed by cache key.
type InFlightTable = Mutex<HashMap<String, Arc<FetchCell>>>;

fn lock_table(table: &InFlightTable) -> MutexGuard<'_, HashMap<String, Arc<FetchCell>>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One caller's share of an in-flight fetch.
///
/// The last holder to go away, whether it finished or was cancelled, removes
/// the table entry, so a cancelled request never leaves a cell behind.
struct InFlightGuard<'a> {
    table: &'a InFlightTable,
    key: &'a str,
    cell: Option<Arc<FetchCell>>,
}

impl<'a> InFlightGuard<'a> {
    fn join(table: &'a InFlightTable, key: &'a str) -> Self {
        let cell = Arc::clone(
            lock_table(table)
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );
        Self {
            table,
            key,
            cell: Some(cell),
        }
    }

    fn cell(&self) -> &FetchCell {
        match &self.cell {
            Some(cell) => cell,
            None => unreachable!("cell is only taken in drop"),
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut table = lock_table(self.table);
        let Some(cell) = self.cell.take() else {
            return;
        };
        // Table entry plus ours
        let last = Arc::strong_count(&cell) == 2;
        if last && table.get(self.key).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
            table.remove(self.key);
        }
        // Dropped while the table is still locked
        drop(cell);
    }
}

// =============================================================================
// Tile Request
// =============================================================================

/// A request for a tile, as seen by the service.
///
/// Coordinates are the raw signed values from the request path; the service
/// validates them.
#[derive(Debug, Clone)]
pub struct TileRequest {
    /// Zoom level
    pub zoom: i64,

    /// Tile column
    pub x: i64,

    /// Tile row
    pub y: i64,

    /// Whether the inbound request carried a non-empty Referer header
    pub referer_present: bool,

    /// Rate-limit identity of the client
    pub client_key: String,
}

impl TileRequest {
    /// Create a request with a Referer present.
    pub fn new(zoom: i64, x: i64, y: i64, client_key: impl Into<String>) -> Self {
        Self {
            zoom,
            x,
            y,
            referer_present: true,
            client_key: client_key.into(),
        }
    }

    /// Set whether the Referer header was present.
    pub fn with_referer(mut self, present: bool) -> Self {
        self.referer_present = present;
        self
    }
}

// =============================================================================
// Tile Response
// =============================================================================

/// Response from the tile service.
#[derive(Debug, Clone)]
pub struct TileResponse {
    /// Tile bytes exactly as stored or fetched
    pub data: Bytes,

    /// Whether this tile was served from the disk cache
    pub cache_hit: bool,

    /// Content type of `data`
    pub content_type: &'static str,
}

impl TileResponse {
    fn new(data: Bytes, cache_hit: bool) -> Self {
        Self {
            data,
            cache_hit,
            content_type: TILE_CONTENT_TYPE,
        }
    }
}

// =============================================================================
// Tile Cache Service
// =============================================================================

/// Service that serves tiles from the disk cache and fills misses upstream.
///
/// One instance owns the cache index, the rate-limit buckets and the
/// in-flight fetch table; share it behind an `Arc`.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use tile_cache_proxy::{
///     DiskTileCache, HttpTileFetcher, SettingsStore, TileCacheService, TileRequest,
/// };
///
/// let settings = Arc::new(SettingsStore::default());
/// let cache = DiskTileCache::open("./tile-cache", 100 * 1024 * 1024).await?;
/// let service = TileCacheService::new(cache, HttpTileFetcher::new()?, settings);
///
/// let response = service.get_tile(TileRequest::new(3, 4, 2, "203.0.113.7")).await?;
/// println!("{} bytes, cache hit: {}", response.data.len(), response.cache_hit);
/// ```
pub struct TileCacheService<F: TileFetcher> {
    /// Provider and policy snapshot source
    settings: Arc<SettingsStore>,

    /// Disk cache
    cache: Arc<DiskTileCache>,

    /// Upstream provider
    fetcher: Arc<F>,

    /// Per-client request budget
    limiter: RateLimiter,

    /// Fetches in progress
    in_flight: InFlightTable,
}

impl<F: TileFetcher + 'static> TileCacheService<F> {
    /// Create a new service.
    pub fn new(cache: DiskTileCache, fetcher: F, settings: Arc<SettingsStore>) -> Self {
        Self {
            settings,
            cache: Arc::new(cache),
            fetcher: Arc::new(fetcher),
            limiter: RateLimiter::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Get a tile, using the cache when available.
    ///
    /// Checks run in this order, each short-circuiting:
    /// 1. Referer present, else [`TileError::Unauthorized`]
    /// 2. Coordinate valid, else [`TileError::InvalidCoordinate`]
    /// 3. Rate limit, else [`TileError::RateLimited`]
    /// 4. Cache hit, returned as-is
    /// 5. Upstream fetch: 404 is [`TileError::NotFound`], other failures are
    ///    [`TileError::Upstream`]. Nothing is cached on failure.
    ///
    /// A failed cache write is logged and does not fail the request.
    pub async fn get_tile(&self, request: TileRequest) -> Result<TileResponse, TileError> {
        if !request.referer_present {
            return Err(TileError::Unauthorized);
        }

        let coord = TileCoordinate::new(request.zoom, request.x, request.y)?;

        let settings = self.settings.snapshot();

        if let RateLimitDecision::Limited { retry_after } =
            self.limiter.allow(&request.client_key, &settings).await
        {
            return Err(TileError::RateLimited { retry_after });
        }

        let key = coord.cache_key();

        if let Some(data) = self.cache.try_get(&key).await {
            debug!(%coord, size = data.len(), "Tile cache hit");
            return Ok(TileResponse::new(data, true));
        }

        debug!(%coord, "Tile cache miss");
        let data = self.fetch_coalesced(&key, coord, settings).await?;

        Ok(TileResponse::new(data, false))
    }

    /// Fetch through the in-flight table so concurrent misses for one key
    /// share a single upstream request.
    async fn fetch_coalesced(
        &self,
        key: &str,
        coord: TileCoordinate,
        settings: Arc<ProviderSettings>,
    ) -> Result<Bytes, UpstreamError> {
        let guard = InFlightGuard::join(&self.in_flight, key);

        let result = guard
            .cell()
            .get_or_init(|| self.fill(key, coord, settings))
            .await
            .clone();
        result
    }

    /// Fetch a tile and store it, in a task that outlives the caller.
    async fn fill(
        &self,
        key: &str,
        coord: TileCoordinate,
        settings: Arc<ProviderSettings>,
    ) -> Result<Bytes, UpstreamError> {
        // A previous leader may have finished between our miss and now
        if let Some(data) = self.cache.try_get(key).await {
            return Ok(data);
        }

        let cache = Arc::clone(&self.cache);
        let fetcher = Arc::clone(&self.fetcher);
        let key = key.to_string();

        let task = tokio::spawn(async move {
            let data = fetcher.fetch(&settings, &coord).await?;

            apply_budget(&cache, &settings).await;
            if let Err(e) = cache.put(&key, data.clone()).await {
                warn!(%coord, "Failed to cache tile, serving uncached: {}", e);
            } else {
                debug!(%coord, size = data.len(), "Cached upstream tile");
            }

            Ok(data)
        });

        match task.await {
            Ok(result) => result,
            Err(e) => Err(UpstreamError::Transport(format!("fetch task failed: {}", e))),
        }
    }

    /// Get tile cache statistics.
    ///
    /// Returns `(current_size, capacity, entry_count)`.
    pub async fn cache_stats(&self) -> (u64, u64, usize) {
        let size = self.cache.size().await;
        let capacity = self.cache.capacity();
        let count = self.cache.len().await;
        (size, capacity, count)
    }

    /// Clear the tile cache, returning the number of files deleted.
    pub async fn clear_cache(&self) -> Result<usize, CacheError> {
        self.cache.clear().await
    }

    /// Apply the current settings snapshot's cache budget right away.
    ///
    /// Budget changes otherwise take effect on the next cache write.
    pub async fn sync_settings(&self) {
        let settings = self.settings.snapshot();
        apply_budget(&self.cache, &settings).await;
    }

    /// Drop expired rate-limit buckets.
    pub async fn purge_rate_limits(&self) -> usize {
        self.limiter.purge_expired().await
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> Arc<ProviderSettings> {
        self.settings.snapshot()
    }

    /// Provider attribution text for the map UI.
    pub fn attribution(&self) -> String {
        self.settings.snapshot().attribution.clone()
    }

    /// Get a reference to the underlying cache.
    pub fn cache(&self) -> &DiskTileCache {
        &self.cache
    }
}

async fn apply_budget(cache: &DiskTileCache, settings: &ProviderSettings) {
    if cache.capacity() != settings.max_cache_size_bytes {
        cache.set_capacity(settings.max_cache_size_bytes).await;
    }
}

// =============================================================================
// Tests
// =============================================================================
