//! ML operation providers.
//!
//! Every operation sits behind [`OperationProvider`]. The built-in providers are
//! deterministic image-processing stand-ins for the trained models:
//!
//! | Operation | Provider | Output |
//! |-----------|----------|--------|
//! | `sr` | [`LanczosUpscaler`] | upscaled pixels |
//! | `denoise` | [`MedianDenoiser`] | filtered pixels |
//! | `segment` | [`ThresholdSegmenter`] | `crater` extents |
//! | `classify` | [`TerrainClassifier`] | whole-tile terrain labels |
//!
//! Providers are dispatched through the fixed [`OperationTable`]; any slot can
//! be replaced with a custom implementation.

mod classify;
mod denoise;
mod overlay;
mod provider;
mod segment;
mod stats;
mod superres;

pub use classify::{TerrainClassifier, TERRAIN_LABELS};
pub use denoise::{MedianDenoiser, DEFAULT_RADIUS as DEFAULT_DENOISE_RADIUS};
pub use overlay::{draw_feature_overlays, OVERLAY_COLOR, STROKE_WIDTH};
pub use provider::{
    Feature, Geometry, OperationOutput, OperationProvider, OperationResult, OperationTable,
    ProviderSettings,
};
pub use segment::ThresholdSegmenter;
pub use superres::{LanczosUpscaler, DEFAULT_SCALE as DEFAULT_SUPERRES_SCALE};
