use thiserror::Error;

use crate::tile::TileCoordinate;

/// Errors returned by a [`TileStore`](crate::source::TileStore) when fetching original tiles.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The image or coordinate is unknown to the store
    #[error("Tile not found: {0}")]
    NotFound(String),

    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Local filesystem error
    #[error("I/O error: {0}")]
    Io(String),
}

impl StoreError {
    /// Whether this error is a typed absence rather than a storage failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Errors surfaced by [`TileOrchestrator::render`](crate::pipeline::TileOrchestrator::render).
///
/// Operation failures never appear here; they are recorded per operation in
/// the rendered tile.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// The tile store has no tile at this coordinate
    #[error("Tile not found: {coordinate}")]
    NotFound { coordinate: TileCoordinate },

    /// The tile store failed for a reason other than absence
    #[error("Upstream tile store error: {message}")]
    Upstream { message: String },

    /// The fetched bytes could not be decoded into pixels
    #[error("Failed to decode tile: {message}")]
    Decode { message: String },
}

/// A recoverable failure inside one operation provider.
#[derive(Debug, Clone, Error)]
pub enum OperationError {
    /// Input buffer has zero width or height
    #[error("input image is empty")]
    EmptyImage,

    /// Output would exceed the provider's size limit
    #[error("output {width}x{height} exceeds maximum side {max}")]
    TooLarge { width: u32, height: u32, max: u32 },

    /// The provider failed while computing its result
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Errors from an [`EnhancementCache`](crate::cache::EnhancementCache) backend.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The cache backend cannot be reached
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Errors writing tile metadata to the persistence collaborator.
#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialize(String),
}

/// Invalid enhancement options.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptionsError {
    /// Threshold is NaN or outside [0, 1]
    #[error("Invalid confidence threshold: {0} (must be within 0.0-1.0)")]
    InvalidThreshold(f32),

    /// Unrecognized operation name
    #[error("Unknown operation: {0} (expected one of sr, denoise, segment, classify)")]
    UnknownOperation(String),
}

/// Per-item failure inside a batch run.
#[derive(Debug, Clone, Error)]
pub enum BatchError {
    /// Rendering the item failed
    #[error(transparent)]
    Render(#[from] RenderError),

    /// The item's task was cancelled or panicked before producing a result
    #[error("Batch item aborted: {0}")]
    Aborted(String),
}

/// Errors decoding fetched tiles or encoding rendered ones.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("Failed to decode image: {message}")]
    Decode { message: String },

    #[error("Failed to encode image: {message}")]
    Encode { message: String },
}

/// Errors loading an image catalog.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid catalog {path}: {message}")]
    Parse { path: String, message: String },
}
