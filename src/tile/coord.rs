//! Tile coordinates and pyramid geometry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one tile in one image's pyramid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoordinate {
    /// Image identifier (e.g., "mars-001")
    pub image_id: String,

    /// Zoom level
    pub z: u32,

    /// Tile X coordinate (0-indexed from left)
    pub x: u32,

    /// Tile Y coordinate (0-indexed from top)
    pub y: u32,
}

impl TileCoordinate {
    /// Create a new tile coordinate.
    pub fn new(image_id: impl Into<String>, z: u32, x: u32, y: u32) -> Self {
        Self {
            image_id: image_id.into(),
            z,
            x,
            y,
        }
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.image_id, self.z, self.x, self.y)
    }
}

/// Pyramid bounds of one image, as reported by the image catalog.
///
/// The highest listed zoom level is the full-resolution level; each level
/// below it halves both dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBounds {
    /// Full-resolution width in pixels
    pub width: u32,

    /// Full-resolution height in pixels
    pub height: u32,

    /// Tile edge length in pixels
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,

    /// Zoom levels available for this image
    pub zoom_levels: Vec<u32>,
}

/// Default tile edge length, matching the upstream imagery pyramids.
pub const DEFAULT_TILE_SIZE: u32 = 512;

fn default_tile_size() -> u32 {
    DEFAULT_TILE_SIZE
}

impl ImageBounds {
    /// Create bounds with the default tile size.
    pub fn new(width: u32, height: u32, zoom_levels: Vec<u32>) -> Self {
        Self {
            width,
            height,
            tile_size: DEFAULT_TILE_SIZE,
            zoom_levels,
        }
    }

    /// Override the tile size.
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    /// The full-resolution zoom level, if any levels are listed.
    pub fn max_zoom(&self) -> Option<u32> {
        self.zoom_levels.iter().copied().max()
    }

    /// Pixel dimensions of a zoom level.
    ///
    /// Returns `None` if the level is not listed for this image.
    pub fn level_dimensions(&self, z: u32) -> Option<(u32, u32)> {
        if !self.zoom_levels.contains(&z) {
            return None;
        }
        let shift = self.max_zoom()? - z;
        // Levels 64+ steps below full resolution collapse to one pixel
        let scale = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        let w = div_ceil(u64::from(self.width), scale).max(1);
        let h = div_ceil(u64::from(self.height), scale).max(1);
        Some((w as u32, h as u32))
    }

    /// Number of tiles in X and Y at a zoom level.
    pub fn grid(&self, z: u32) -> Option<(u32, u32)> {
        if self.tile_size == 0 {
            return None;
        }
        let (w, h) = self.level_dimensions(z)?;
        let tile = u64::from(self.tile_size);
        Some((
            div_ceil(u64::from(w), tile) as u32,
            div_ceil(u64::from(h), tile) as u32,
        ))
    }
}

fn div_ceil(value: u64, divisor: u64) -> u64 {
    value / divisor + u64::from(value % divisor != 0)
}
