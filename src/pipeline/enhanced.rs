use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::enhance::{Feature, OperationResult};
use crate::tile::{EnhancementOptions, OperationKind, PixelBuffer, TileCoordinate};

/// The assembled output of rendering one tile.
///
/// Built once by the orchestrator and shared read-only as `Arc<EnhancedTile>`
/// between the cache and every caller that asked for it.
#[derive(Debug, Clone)]
pub struct EnhancedTile {
    pub coordinate: TileCoordinate,

    pub options: EnhancementOptions,

    /// Output pixels after every requested operation and any overlays
    pub final_image: Arc<PixelBuffer>,

    /// Exactly one entry per requested operation
    pub per_operation: BTreeMap<OperationKind, OperationResult>,

    /// Wall time from fetch to assembly
    pub processing_time: Duration,

    pub computed_at: DateTime<Utc>,
}

impl EnhancedTile {
    /// Whether at least one requested operation succeeded.
    pub fn enhanced(&self) -> bool {
        self.per_operation.values().any(|r| r.succeeded)
    }

    /// Model versions of the successful operations, joined with `+`.
    pub fn model_version(&self) -> Option<String> {
        let versions: Vec<&str> = self
            .per_operation
            .values()
            .filter(|r| r.succeeded)
            .map(|r| r.model_version.as_str())
            .collect();
        if versions.is_empty() {
            None
        } else {
            Some(versions.join("+"))
        }
    }

    /// Confidence of each successful operation.
    pub fn confidence_scores(&self) -> BTreeMap<OperationKind, f32> {
        self.per_operation
            .iter()
            .filter_map(|(kind, r)| r.confidence.map(|c| (*kind, c)))
            .collect()
    }

    /// All detected features across operations.
    pub fn features(&self) -> impl Iterator<Item = &Feature> {
        self.per_operation.values().flat_map(|r| r.detected_features.iter())
    }

    /// Distinct feature labels, sorted.
    pub fn labels(&self) -> BTreeSet<&str> {
        self.features().map(|f| f.label.as_str()).collect()
    }

    /// Approximate heap footprint, counting each distinct pixel buffer once.
    pub fn approx_bytes(&self) -> usize {
        let mut buffers: Vec<&Arc<PixelBuffer>> = vec![&self.final_image];
        for image in self.per_operation.values().filter_map(|r| r.image.as_ref()) {
            if !buffers.iter().any(|b| Arc::ptr_eq(b, image)) {
                buffers.push(image);
            }
        }

        let pixels: usize = buffers.iter().map(|b| b.as_raw().len()).sum();
        let features: usize = self
            .features()
            .map(|f| mem::size_of::<Feature>() + f.label.len())
            .sum();

        mem::size_of::<Self>()
            + self.coordinate.image_id.len()
            + self.per_operation.len() * mem::size_of::<OperationResult>()
            + pixels
            + features
    }
}

/// Outcome of a successful render.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub tile: Arc<EnhancedTile>,

    /// Whether the tile was served from the cache
    pub cache_hit: bool,
}
