use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::tile::TileCoordinate;

/// Default file extension of stored original tiles.
pub const DEFAULT_TILE_EXTENSION: &str = "jpg";

/// Source of original (unenhanced) tile bytes.
///
/// Implementations must be thread-safe; a single store is shared by every
/// render, precompute job and batch.
#[async_trait]
pub trait TileStore: Send + Sync + 'static {
    /// Fetch the encoded bytes of one original tile.
    ///
    /// Returns [`StoreError::NotFound`] when no tile exists at the coordinate.
    async fn fetch(&self, coordinate: &TileCoordinate) -> Result<Bytes, StoreError>;
}

#[async_trait]
impl<T: TileStore + ?Sized> TileStore for Arc<T> {
    async fn fetch(&self, coordinate: &TileCoordinate) -> Result<Bytes, StoreError> {
        (**self).fetch(coordinate).await
    }
}

/// Reject ids that could escape the store's namespace.
pub(crate) fn validate_image_id(image_id: &str) -> Result<(), StoreError> {
    let invalid = image_id.is_empty()
        || image_id == "."
        || image_id == ".."
        || image_id.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StoreError::NotFound(format!("invalid image id: {:?}", image_id)));
    }
    Ok(())
}

/// Relative object path `{image_id}/{z}/{x}/{y}.{ext}`.
pub(crate) fn tile_path(coordinate: &TileCoordinate, extension: &str) -> String {
    format!(
        "{}/{}/{}/{}.{}",
        coordinate.image_id, coordinate.z, coordinate.x, coordinate.y, extension
    )
}

// =============================================================================
// Memory Store
// =============================================================================

/// Tile store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryTileStore {
    tiles: RwLock<HashMap<TileCoordinate, Bytes>>,
}

impl MemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a tile.
    pub async fn insert(&self, coordinate: TileCoordinate, data: impl Into<Bytes>) {
        self.tiles.write().await.insert(coordinate, data.into());
    }

    pub async fn remove(&self, coordinate: &TileCoordinate) -> Option<Bytes> {
        self.tiles.write().await.remove(coordinate)
    }

    pub async fn len(&self) -> usize {
        self.tiles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tiles.read().await.is_empty()
    }
}

#[async_trait]
impl TileStore for MemoryTileStore {
    async fn fetch(&self, coordinate: &TileCoordinate) -> Result<Bytes, StoreError> {
        self.tiles
            .read()
            .await
            .get(coordinate)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(coordinate.to_string()))
    }
}
