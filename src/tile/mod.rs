//! Tile primitives.
//!
//! - [`TileCoordinate`]: identifies one tile in one image's pyramid
//! - [`ImageBounds`]: pyramid geometry used to enumerate tile grids
//! - [`OperationKind`], [`OperationSet`], [`EnhancementOptions`]: what to do with a tile
//! - [`decode_tile`], [`JpegTileEncoder`]: conversion between encoded bytes and [`PixelBuffer`]
//!
//! # Example
//!
//! ```
//! use deep_zoom_enhancer::tile::{EnhancementOptions, OperationKind, OperationSet, TileCoordinate};
//!
//! let coord = TileCoordinate::new("mars-001", 5, 3, 7);
//! let ops = OperationSet::empty()
//!     .with(OperationKind::Denoise)
//!     .with(OperationKind::SuperRes);
//! let options = EnhancementOptions::new(ops, 0.6, true).unwrap();
//!
//! assert_eq!(coord.to_string(), "mars-001/5/3/7");
//! assert_eq!(options.operations().to_string(), "sr+denoise");
//! ```

mod coord;
mod encoder;
mod options;

pub use coord::{ImageBounds, TileCoordinate, DEFAULT_TILE_SIZE};
pub use encoder::{
    clamp_quality, decode_tile, is_valid_quality, JpegTileEncoder, PixelBuffer,
    DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use options::{EnhancementOptions, OperationKind, OperationSet, DEFAULT_CONFIDENCE_THRESHOLD};
