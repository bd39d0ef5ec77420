//! In-process cache of enhanced tiles.
//!
//! Entries are evicted least-recently-used first when either the total
//! approximate size or the entry count exceeds its limit. A per-image index
//! of keys makes `invalidate_image` proportional to that image's entries
//! rather than the whole cache.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CacheError;
use crate::pipeline::EnhancedTile;

use super::CacheKey;

/// Default cache capacity: 512MB
pub const DEFAULT_CACHE_CAPACITY_BYTES: usize = 512 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;

// =============================================================================
// Cache Trait
// =============================================================================

/// Usage counters reported by a cache backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub bytes_used: usize,
    pub capacity_bytes: usize,
}

/// Store of enhanced tiles keyed by [`CacheKey`].
///
/// Every method may fail with [`CacheError::Unavailable`] for remote
/// backends; callers treat that as a miss rather than a render failure.
#[async_trait]
pub trait EnhancementCache: Send + Sync + 'static {
    /// Look up a tile, counting a hit or a miss.
    async fn get(&self, key: &CacheKey) -> Result<Option<Arc<EnhancedTile>>, CacheError>;

    /// Store a tile, replacing any entry under the same key.
    async fn put(&self, key: CacheKey, tile: Arc<EnhancedTile>) -> Result<(), CacheError>;

    /// Remove every entry for an image, returning how many were removed.
    async fn invalidate_image(&self, image_id: &str) -> Result<usize, CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

// =============================================================================
// Memory Cache
// =============================================================================

struct Inner {
    entries: LruCache<CacheKey, Arc<EnhancedTile>>,
    by_image: HashMap<String, HashSet<CacheKey>>,
    bytes_used: usize,
}

impl Inner {
    fn index(&mut self, key: &CacheKey) {
        self.by_image
            .entry(key.image_id().to_string())
            .or_default()
            .insert(key.clone());
    }

    fn unindex(&mut self, key: &CacheKey) {
        if let Some(keys) = self.by_image.get_mut(key.image_id()) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_image.remove(key.image_id());
            }
        }
    }
}

/// LRU cache of enhanced tiles with byte and entry limits.
///
/// The LRU and the image index live behind one mutex, so invalidation is
/// atomic with respect to concurrent `get` and `put`. The lock is only held
/// inside these methods, never across a render.
///
/// # Example
///
/// ```
/// use deep_zoom_enhancer::cache::{EnhancementCache, MemoryEnhancementCache};
///
/// #[tokio::main]
/// async fn main() {
///     let cache = MemoryEnhancementCache::with_capacity(64 * 1024 * 1024);
///     let stats = cache.stats().await.unwrap();
///     assert_eq!(stats.entry_count, 0);
///     assert_eq!(stats.capacity_bytes, 64 * 1024 * 1024);
/// }
/// ```
pub struct MemoryEnhancementCache {
    inner: Mutex<Inner>,

    /// Maximum total size in bytes
    max_bytes: usize,

    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryEnhancementCache {
    /// Create a cache with default limits.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY_BYTES)
    }

    /// Create a cache with the given byte capacity.
    pub fn with_capacity(max_bytes: usize) -> Self {
        Self::with_capacity_and_entries(max_bytes, DEFAULT_CACHE_MAX_ENTRIES)
    }

    /// Create a cache with byte and entry limits. An entry limit of zero is
    /// treated as one.
    pub fn with_capacity_and_entries(max_bytes: usize, max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(max_entries),
                by_image: HashMap::new(),
                bytes_used: 0,
            }),
            max_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Check for an entry without touching LRU order or counters.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().await.entries.contains(key)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Maximum capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_bytes
    }
}

impl Default for MemoryEnhancementCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnhancementCache for MemoryEnhancementCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Arc<EnhancedTile>>, CacheError> {
        let found = self.inner.lock().await.entries.get(key).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(found)
    }

    async fn put(&self, key: CacheKey, tile: Arc<EnhancedTile>) -> Result<(), CacheError> {
        let size = tile.approx_bytes();
        let mut inner = self.inner.lock().await;

        // `push` hands back either the previous value for this key or the
        // entry evicted to respect the entry limit
        if let Some((old_key, old_tile)) = inner.entries.push(key.clone(), tile) {
            inner.bytes_used = inner.bytes_used.saturating_sub(old_tile.approx_bytes());
            if old_key != key {
                inner.unindex(&old_key);
            }
        }
        inner.bytes_used += size;
        inner.index(&key);

        while inner.bytes_used > self.max_bytes {
            match inner.entries.pop_lru() {
                Some((evicted_key, evicted)) => {
                    inner.bytes_used = inner.bytes_used.saturating_sub(evicted.approx_bytes());
                    inner.unindex(&evicted_key);
                    debug!(key = %evicted_key, "Evicted enhanced tile");
                }
                None => break,
            }
        }
        Ok(())
    }

    async fn invalidate_image(&self, image_id: &str) -> Result<usize, CacheError> {
        let mut inner = self.inner.lock().await;
        let Some(keys) = inner.by_image.remove(image_id) else {
            return Ok(0);
        };

        let mut removed = 0;
        for key in keys {
            if let Some(tile) = inner.entries.pop(&key) {
                inner.bytes_used = inner.bytes_used.saturating_sub(tile.approx_bytes());
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let inner = self.inner.lock().await;
        Ok(CacheStats {
            entry_count: inner.entries.len(),
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            bytes_used: inner.bytes_used,
            capacity_bytes: self.max_bytes,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
