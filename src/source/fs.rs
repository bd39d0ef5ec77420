//! Filesystem-backed tile store.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreError;
use crate::tile::TileCoordinate;

use super::store::{tile_path, validate_image_id, DEFAULT_TILE_EXTENSION};
use super::TileStore;

/// Reads original tiles laid out as `{root}/{image_id}/{z}/{x}/{y}.{ext}`.
#[derive(Debug, Clone)]
pub struct FsTileStore {
    root: PathBuf,
    extension: String,
}

impl FsTileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: DEFAULT_TILE_EXTENSION.to_string(),
        }
    }

    /// Use a different tile file extension (without the dot).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a tile, after validating the image id.
    pub fn path_for(&self, coordinate: &TileCoordinate) -> Result<PathBuf, StoreError> {
        validate_image_id(&coordinate.image_id)?;
        Ok(self.root.join(tile_path(coordinate, &self.extension)))
    }
}

#[async_trait]
impl TileStore for FsTileStore {
    async fn fetch(&self, coordinate: &TileCoordinate) -> Result<Bytes, StoreError> {
        let path = self.path_for(coordinate)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(StoreError::Io(format!("{}: {}", path.display(), e))),
        }
    }
}
