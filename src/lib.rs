//! # Deep Zoom Enhancer
//!
//! A tile server for planetary imagery that layers ML enhancement and analysis
//! on top of Deep Zoom pyramids.
//!
//! Original tiles are fetched from S3 or a local directory, run through a
//! chain of operations (super-resolution, denoising, segmentation,
//! classification), and cached per tile and option set.
//!
//! ## Features
//!
//! - **On-demand enhancement**: any subset of operations per request, in a fixed pipeline order
//! - **Graceful degradation**: a failing operation passes its input through instead of failing the tile
//! - **Enhancement cache**: byte- and entry-bounded LRU keyed by coordinate and options
//! - **Precompute jobs**: background warming of whole zoom levels with cancellation
//! - **Batch inference**: chunked batches with per-item isolation
//!
//! ## Architecture
//!
//! - [`tile`] - Coordinates, enhancement options and the JPEG codec
//! - [`source`] - Tile stores (S3, filesystem, memory) and the image catalog
//! - [`enhance`] - Operation providers and overlay drawing
//! - [`cache`] - Cache keys and the enhancement cache
//! - [`pipeline`] - Orchestrator, precompute scheduler and batch coordinator
//! - [`persist`] - Per-tile metadata sinks
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use deep_zoom_enhancer::{
//!     EnhancementOptions, MemoryEnhancementCache, MemoryTileStore, OperationKind, OperationSet,
//!     OperationTable, TileCoordinate, TileOrchestrator,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let orchestrator = TileOrchestrator::new(
//!         MemoryTileStore::new(),
//!         MemoryEnhancementCache::new(),
//!         OperationTable::builtin(),
//!     );
//!
//!     let options = EnhancementOptions::with_operations(
//!         OperationSet::empty().with(OperationKind::SuperRes),
//!     );
//!     let coord = TileCoordinate::new("mars-001", 5, 3, 7);
//!     match orchestrator.render(&coord, &options).await {
//!         Ok(rendered) => println!("cache hit: {}", rendered.cache_hit),
//!         Err(e) => eprintln!("{}", e),
//!     }
//! }
//! ```

pub mod cache;
pub mod config;
pub mod enhance;
pub mod error;
pub mod persist;
pub mod pipeline;
pub mod server;
pub mod source;
pub mod tile;

// Re-export commonly used types
pub use cache::{CacheKey, CacheStats, EnhancementCache, MemoryEnhancementCache};
pub use config::Config;
pub use enhance::{
    Feature, Geometry, OperationOutput, OperationProvider, OperationResult, OperationTable,
    ProviderSettings,
};
pub use error::{
    BatchError, CacheError, CatalogError, CodecError, OperationError, OptionsError,
    PersistenceError, RenderError, StoreError,
};
pub use persist::{JsonLinesMetadataSink, MetadataSink, TileMetadata, TracingMetadataSink};
pub use pipeline::{
    BatchCoordinator, BatchRequest, EnhancedTile, PrecomputeHandle, PrecomputeProgress,
    PrecomputeScheduler, PrecomputeSummary, Rendered, TileOrchestrator,
};
pub use server::{create_router, AppState, ErrorResponse, RouterConfig};
pub use source::{
    create_s3_client, FsTileStore, ImageCatalog, MemoryTileStore, S3TileStore, StaticCatalog,
    TileStore,
};
pub use tile::{
    decode_tile, EnhancementOptions, ImageBounds, JpegTileEncoder, OperationKind, OperationSet,
    PixelBuffer, TileCoordinate,
};
