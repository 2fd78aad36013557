//! Disk-backed tile cache with a total-size budget.
//!
//! Tiles are stored as `{cache_dir}/{zoom}_{x}_{y}.png`, byte-for-byte as
//! received from the provider. An in-memory index tracks each entry's size
//! and recency so that eviction does not need to scan the directory.
//!
//! # Size-Based Eviction
//!
//! After every [`DiskTileCache::put`] the cache evicts least-recently-accessed
//! entries until the total size is within budget. The entry just written is
//! never evicted by its own put, so a single tile larger than the whole budget
//! is kept (the cache is then over budget until the next put evicts it).
//!
//! # Locking
//!
//! The index and the running total share one mutex, held only for metadata
//! updates. File reads, writes and deletes happen outside it. Anything that
//! creates or deletes a key's file (put, eviction, adoption of an unindexed
//! file) holds that key's write stripe, taken before the index lock and never
//! nested with another stripe.
//!
//! Eviction drops entries from the index first and unlinks their files later.
//! Until then the key is marked as evicting: reads do not adopt its file back
//! into the index, and a put of the same key clears the mark so the fresh
//! file is left alone.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::coord::{file_name_for_key, key_from_file_name};
use crate::error::CacheError;

/// Default cache budget: 100MB
pub const DEFAULT_TILE_CACHE_CAPACITY: u64 = 100 * 1024 * 1024;

/// Number of write stripes used to serialize puts per key.
const WRITE_STRIPES: usize = 64;

// =============================================================================
// Cache Entry
// =============================================================================

/// Index metadata for one cached tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Cache key (`"{zoom}_{x}_{y}"`)
    pub key: String,

    /// Size of the stored file in bytes
    pub size_bytes: u64,

    /// Last time the tile was written or served from cache
    pub last_access: SystemTime,
}

impl CacheEntry {
    fn new(key: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            key: key.into(),
            size_bytes,
            last_access: SystemTime::now(),
        }
    }
}

/// Index plus running total, guarded together.
struct CacheState {
    /// Entries in recency order (most recently accessed at the head)
    index: LruCache<String, CacheEntry>,

    /// Sum of `size_bytes` over the index
    total_bytes: u64,

    /// Keys dropped from the index whose files are not yet unlinked
    evicting: HashSet<String>,
}

impl CacheState {
    fn insert(&mut self, entry: CacheEntry) {
        self.evicting.remove(&entry.key);
        if let Some(old) = self.index.pop(&entry.key) {
            self.total_bytes = self.total_bytes.saturating_sub(old.size_bytes);
        }
        self.total_bytes += entry.size_bytes;
        self.index.put(entry.key.clone(), entry);
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.index.pop(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Pop least-recently-accessed entries until within `budget`.
    ///
    /// `keep` is never popped; if it is the last entry left, eviction stops.
    fn evict_to(&mut self, budget: u64, keep: Option<&str>) -> Vec<CacheEntry> {
        let mut evicted = Vec::new();

        while self.total_bytes > budget {
            let lru_key = match self.index.peek_lru() {
                Some((key, _)) => key.clone(),
                None => break,
            };

            if Some(lru_key.as_str()) == keep {
                if self.index.len() == 1 {
                    break;
                }
                self.index.promote(&lru_key);
                continue;
            }

            if let Some(entry) = self.remove(&lru_key) {
                self.evicting.insert(entry.key.clone());
                evicted.push(entry);
            }
        }

        evicted
    }
}

// =============================================================================
// Disk Tile Cache
// =============================================================================

/// Size-bounded tile store on the local filesystem.
///
/// # Example
///
/// ```no_run
/// use tile_cache_proxy::tile::DiskTileCache;
/// use bytes::Bytes;
///
/// #[tokio::main]
/// async fn main() {
///     let cache = DiskTileCache::open("/var/cache/tiles", 50 * 1024 * 1024)
///         .await
///         .unwrap();
///
///     cache.put("1_2_3", Bytes::from_static(b"\x89PNG")).await.unwrap();
///     assert_eq!(cache.try_get("1_2_3").await, Some(Bytes::from_static(b"\x89PNG")));
/// }
/// ```
pub struct DiskTileCache {
    /// Directory holding the tile files
    dir: PathBuf,

    /// Entry index and total size
    state: Mutex<CacheState>,

    /// Budget in bytes
    capacity: AtomicU64,

    /// Per-key write serialization
    write_stripes: Vec<Mutex<()>>,
}

impl DiskTileCache {
    /// Open a cache rooted at `dir` with the given budget in bytes.
    ///
    /// Creates the directory if needed and indexes any tiles already in it,
    /// oldest modification time first. If those exceed the budget they are
    /// trimmed immediately.
    pub async fn open(dir: impl Into<PathBuf>, capacity: u64) -> Result<Self, CacheError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::io(&dir, e))?;

        let existing = scan_dir(&dir).await?;

        let mut state = CacheState {
            index: LruCache::unbounded(),
            total_bytes: 0,
            evicting: HashSet::new(),
        };
        for entry in existing {
            state.insert(entry);
        }

        let evicted = state.evict_to(capacity, None);

        info!(
            dir = %dir.display(),
            entries = state.index.len(),
            size_bytes = state.total_bytes,
            capacity_bytes = capacity,
            "Opened tile cache"
        );

        let cache = Self {
            dir,
            state: Mutex::new(state),
            capacity: AtomicU64::new(capacity),
            write_stripes: (0..WRITE_STRIPES).map(|_| Mutex::new(())).collect(),
        };
        cache.delete_files(evicted).await;

        Ok(cache)
    }

    /// Look up a tile.
    ///
    /// Returns the stored bytes unchanged and marks the entry as recently
    /// accessed. A tile file present on disk but not yet indexed is adopted.
    pub async fn try_get(&self, key: &str) -> Option<Bytes> {
        let path = self.path_for(key);

        match tokio::fs::read(&path).await {
            Ok(data) => {
                let data = Bytes::from(data);
                if !self.touch(key).await {
                    self.adopt(key, data.len() as u64).await;
                }
                Some(data)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let _guard = self.stripe(key).lock().await;
                // A put may have landed since the read
                if tokio::fs::metadata(&path).await.is_err()
                    && self.state.lock().await.remove(key).is_some()
                {
                    debug!(key, "Dropped index entry for missing tile file");
                }
                None
            }
            Err(e) => {
                warn!(key, path = %path.display(), "Failed to read cached tile: {}", e);
                None
            }
        }
    }

    /// Store a tile, then evict least-recently-accessed entries until the
    /// cache is within budget.
    ///
    /// The file is written to a temporary name and renamed into place so
    /// readers never see a partial tile.
    pub async fn put(&self, key: &str, data: Bytes) -> Result<(), CacheError> {
        let evicted = {
            let _guard = self.stripe(key).lock().await;

            let path = self.path_for(key);
            let tmp = self.dir.join(format!(".{}.tmp", file_name_for_key(key)));

            tokio::fs::write(&tmp, &data)
                .await
                .map_err(|e| CacheError::io(&tmp, e))?;

            if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(CacheError::io(&path, e));
            }

            let mut state = self.state.lock().await;
            state.insert(CacheEntry::new(key, data.len() as u64));
            state.evict_to(self.capacity(), Some(key))
        };

        self.delete_files(evicted).await;
        Ok(())
    }

    /// Check whether a key is indexed, without touching its recency.
    pub async fn contains(&self, key: &str) -> bool {
        self.state.lock().await.index.contains(key)
    }

    /// Index metadata for a key, without touching its recency.
    pub async fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.state.lock().await.index.peek(key).cloned()
    }

    /// Remove a tile from the cache.
    ///
    /// Returns `true` if the key was indexed.
    pub async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let _guard = self.stripe(key).lock().await;

        let removed = self.state.lock().await.remove(key).is_some();
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(removed),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    /// Remove every cached tile, including unindexed tile files.
    ///
    /// Returns the number of files deleted.
    pub async fn clear(&self) -> Result<usize, CacheError> {
        {
            let mut state = self.state.lock().await;
            state.index.clear();
            state.total_bytes = 0;
        }

        let mut deleted = 0;
        for entry in scan_dir(&self.dir).await? {
            let path = self.path_for(&entry.key);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io(&path, e)),
            }
        }

        info!(deleted, "Cleared tile cache");
        Ok(deleted)
    }

    /// Number of indexed tiles.
    pub async fn len(&self) -> usize {
        self.state.lock().await.index.len()
    }

    /// Check if the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.index.is_empty()
    }

    /// Total size of indexed tiles in bytes.
    pub async fn size(&self) -> u64 {
        self.state.lock().await.total_bytes
    }

    /// Budget in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Change the budget, evicting immediately if the cache no longer fits.
    pub async fn set_capacity(&self, capacity: u64) {
        let previous = self.capacity.swap(capacity, Ordering::Relaxed);
        if capacity >= previous {
            return;
        }

        let evicted = self.state.lock().await.evict_to(capacity, None);
        if !evicted.is_empty() {
            info!(
                capacity_bytes = capacity,
                evicted = evicted.len(),
                "Tile cache budget reduced"
            );
        }
        self.delete_files(evicted).await;
    }

    /// Directory holding the tile files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name_for_key(key))
    }

    fn stripe(&self, key: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.write_stripes[(hasher.finish() as usize) % self.write_stripes.len()]
    }

    /// Mark an indexed entry as accessed. Returns `false` if not indexed.
    async fn touch(&self, key: &str) -> bool {
        match self.state.lock().await.index.get_mut(key) {
            Some(entry) => {
                entry.last_access = SystemTime::now();
                true
            }
            None => false,
        }
    }

    /// Index a tile file that exists on disk but not in the index.
    ///
    /// Skipped if the file is pending eviction or was deleted after it was
    /// read.
    async fn adopt(&self, key: &str, size_bytes: u64) {
        let _guard = self.stripe(key).lock().await;

        if tokio::fs::metadata(self.path_for(key)).await.is_err() {
            return;
        }

        let mut state = self.state.lock().await;
        if state.evicting.contains(key) {
            return;
        }
        match state.index.get_mut(key) {
            Some(entry) => entry.last_access = SystemTime::now(),
            None => {
                debug!(key, size = size_bytes, "Adopting unindexed tile file");
                state.insert(CacheEntry::new(key, size_bytes));
            }
        }
    }

    /// Unlink the files of entries already dropped from the index.
    async fn delete_files(&self, evicted: Vec<CacheEntry>) {
        for entry in evicted {
            let _guard = self.stripe(&entry.key).lock().await;
            if !self.state.lock().await.evicting.remove(&entry.key) {
                debug!(key = %entry.key, "Evicted tile re-cached, keeping file");
                continue;
            }

            let path = self.path_for(&entry.key);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(key = %entry.key, size = entry.size_bytes, "Evicted tile"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), "Failed to delete evicted tile: {}", e),
            }
        }
    }
}

/// List tile files in `dir` as index entries, oldest modification first.
async fn scan_dir(dir: &Path) -> Result<Vec<CacheEntry>, CacheError> {
    let mut reader = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| CacheError::io(dir, e))?;

    let mut entries = Vec::new();
    while let Some(item) = reader
        .next_entry()
        .await
        .map_err(|e| CacheError::io(dir, e))?
    {
        let name = item.file_name();
        let Some(key) = name.to_str().and_then(key_from_file_name) else {
            continue;
        };
        let Ok(meta) = item.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        entries.push(CacheEntry {
            key: key.to_string(),
            size_bytes: meta.len(),
            last_access: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }

    entries.sort_by_key(|e| e.last_access);
    Ok(entries)
}

// =============================================================================
// Tests
// =============================================================================
