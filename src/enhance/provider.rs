//! The operation provider contract and its dispatch table.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::OperationError;
use crate::tile::{OperationKind, PixelBuffer};

use super::classify::TerrainClassifier;
use super::denoise::MedianDenoiser;
use super::segment::ThresholdSegmenter;
use super::superres::LanczosUpscaler;

// =============================================================================
// Results
// =============================================================================

/// Shape of a detected feature, in pixel coordinates of the analysed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    /// Axis-aligned rectangle
    Extent {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    /// The label applies to the whole tile
    Tile,
}

/// A labelled detection produced by Segment or Classify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub label: String,
    pub confidence: f32,
    pub geometry: Geometry,
}

/// What a provider computes on success.
#[derive(Debug, Clone)]
pub struct OperationOutput {
    /// Transformed pixels, for image-transforming operations
    pub image: Option<PixelBuffer>,

    /// Confidence of this call's result, in [0, 1]
    pub confidence: f32,

    /// Detected features at or above the requested threshold
    pub features: Vec<Feature>,
}

impl OperationOutput {
    /// Output of an image-transforming operation.
    pub fn transformed(image: PixelBuffer, confidence: f32) -> Self {
        Self {
            image: Some(image),
            confidence: confidence.clamp(0.0, 1.0),
            features: Vec::new(),
        }
    }

    /// Output of an analysis operation.
    pub fn detected(features: Vec<Feature>, confidence: f32) -> Self {
        Self {
            image: None,
            confidence: confidence.clamp(0.0, 1.0),
            features,
        }
    }
}

/// Per-operation outcome recorded in an enhanced tile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    pub kind: OperationKind,

    /// Output pixels; for a failed image-transforming operation this is the
    /// untouched input
    #[serde(skip)]
    pub image: Option<Arc<PixelBuffer>>,

    /// Absent when the operation failed
    pub confidence: Option<f32>,

    pub model_version: String,

    pub detected_features: Vec<Feature>,

    pub succeeded: bool,
}

impl OperationResult {
    /// Result of a successful call.
    pub fn success(kind: OperationKind, model_version: impl Into<String>, output: OperationOutput) -> Self {
        Self {
            kind,
            image: output.image.map(Arc::new),
            confidence: Some(output.confidence),
            model_version: model_version.into(),
            detected_features: output.features,
            succeeded: true,
        }
    }

    /// Result of a failed call.
    pub fn failure(kind: OperationKind, model_version: impl Into<String>) -> Self {
        Self {
            kind,
            image: None,
            confidence: None,
            model_version: model_version.into(),
            detected_features: Vec::new(),
            succeeded: false,
        }
    }

    /// Substitute the untouched input as this slot's image.
    pub(crate) fn with_passthrough(mut self, input: &Arc<PixelBuffer>) -> Self {
        if !self.succeeded && self.kind.transforms_image() {
            self.image = Some(Arc::clone(input));
        }
        self
    }
}

// =============================================================================
// Provider Trait
// =============================================================================

/// Uniform interface to one ML operation.
///
/// Implementations hold only read-only state and are shared across tasks
/// without locking. `run` may be called concurrently.
pub trait OperationProvider: Send + Sync {
    /// The operation this provider implements.
    fn kind(&self) -> OperationKind;

    /// Version string of the underlying model.
    fn model_version(&self) -> &str;

    /// Compute the operation on `image`.
    ///
    /// `threshold` is the minimum confidence for a feature to be reported.
    fn run(&self, image: &PixelBuffer, threshold: f32) -> Result<OperationOutput, OperationError>;

    /// Compute the operation, turning a failure into `succeeded = false`.
    ///
    /// The failure reason is logged, not returned.
    fn apply(&self, image: &PixelBuffer, threshold: f32) -> OperationResult {
        match self.run(image, threshold) {
            Ok(output) => OperationResult::success(self.kind(), self.model_version(), output),
            Err(e) => {
                warn!(
                    operation = %self.kind(),
                    model_version = self.model_version(),
                    width = image.width(),
                    height = image.height(),
                    "Operation failed: {}",
                    e
                );
                OperationResult::failure(self.kind(), self.model_version())
            }
        }
    }
}

// =============================================================================
// Operation Table
// =============================================================================

/// Settings for the built-in providers.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub superres_scale: u32,
    pub superres_max_side: u32,
    pub denoise_radius: u32,
    pub segment_min_area: u32,
    pub segment_max_regions: usize,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            superres_scale: super::superres::DEFAULT_SCALE,
            superres_max_side: super::superres::DEFAULT_MAX_SIDE,
            denoise_radius: super::denoise::DEFAULT_RADIUS,
            segment_min_area: super::segment::DEFAULT_MIN_AREA,
            segment_max_regions: super::segment::DEFAULT_MAX_REGIONS,
        }
    }
}

/// Fixed dispatch table from [`OperationKind`] to its provider.
#[derive(Clone)]
pub struct OperationTable {
    super_res: Arc<dyn OperationProvider>,
    denoise: Arc<dyn OperationProvider>,
    segment: Arc<dyn OperationProvider>,
    classify: Arc<dyn OperationProvider>,
}

impl OperationTable {
    /// Table of built-in providers with default settings.
    pub fn builtin() -> Self {
        Self::with_settings(&ProviderSettings::default())
    }

    /// Table of built-in providers.
    pub fn with_settings(settings: &ProviderSettings) -> Self {
        Self {
            super_res: Arc::new(LanczosUpscaler::new(
                settings.superres_scale,
                settings.superres_max_side,
            )),
            denoise: Arc::new(MedianDenoiser::new(settings.denoise_radius)),
            segment: Arc::new(ThresholdSegmenter::new(
                settings.segment_min_area,
                settings.segment_max_regions,
            )),
            classify: Arc::new(TerrainClassifier::new()),
        }
    }

    /// Replace the provider for `provider.kind()`.
    pub fn with_provider(mut self, provider: Arc<dyn OperationProvider>) -> Self {
        let slot = match provider.kind() {
            OperationKind::SuperRes => &mut self.super_res,
            OperationKind::Denoise => &mut self.denoise,
            OperationKind::Segment => &mut self.segment,
            OperationKind::Classify => &mut self.classify,
        };
        *slot = provider;
        self
    }

    /// Look up the provider for a kind.
    pub fn get(&self, kind: OperationKind) -> &Arc<dyn OperationProvider> {
        match kind {
            OperationKind::SuperRes => &self.super_res,
            OperationKind::Denoise => &self.denoise,
            OperationKind::Segment => &self.segment,
            OperationKind::Classify => &self.classify,
        }
    }

    /// Model version of every slot, in pipeline order.
    pub fn model_versions(&self) -> Vec<(OperationKind, String)> {
        OperationKind::ALL
            .into_iter()
            .map(|kind| (kind, self.get(kind).model_version().to_string()))
            .collect()
    }
}

impl Default for OperationTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for OperationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.model_versions()).finish()
    }
}
