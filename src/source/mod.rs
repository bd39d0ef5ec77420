//! Where original tiles and image metadata come from.
//!
//! - [`TileStore`]: fetches original tile bytes by coordinate
//!   ([`S3TileStore`], [`FsTileStore`], [`MemoryTileStore`])
//! - [`ImageCatalog`]: resolves an image id to its pyramid bounds ([`StaticCatalog`])

mod catalog;
mod fs;
mod s3;
mod store;

pub use catalog::{ImageCatalog, StaticCatalog};
pub use fs::FsTileStore;
pub use s3::{create_s3_client, S3TileStore};
pub use store::{MemoryTileStore, TileStore, DEFAULT_TILE_EXTENSION};
