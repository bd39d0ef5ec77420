//! Caching of enhanced tiles.
//!
//! Tiles are cached by a composite [`CacheKey`] made of:
//! - Tile coordinate (image, zoom, column, row)
//! - Requested operation set, independent of request order
//! - Confidence threshold
//! - Overlay flag

mod key;
mod memory;

pub use key::CacheKey;
pub use memory::{
    CacheStats, EnhancementCache, MemoryEnhancementCache, DEFAULT_CACHE_CAPACITY_BYTES,
    DEFAULT_CACHE_MAX_ENTRIES,
};
