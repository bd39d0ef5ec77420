use std::fmt;

use sha2::{Digest, Sha256};

use crate::tile::{EnhancementOptions, OperationSet, TileCoordinate};

/// Composite key identifying one enhanced tile.
///
/// Two keys are equal exactly when their coordinates and options are
/// semantically equal: operation sets ignore construction order and the
/// threshold is compared by its canonical bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    coordinate: TileCoordinate,
    operations: OperationSet,
    threshold_bits: u32,
    overlay_labels: bool,
}

impl CacheKey {
    pub fn new(coordinate: &TileCoordinate, options: &EnhancementOptions) -> Self {
        Self {
            coordinate: coordinate.clone(),
            operations: options.operations(),
            threshold_bits: options.threshold_bits(),
            overlay_labels: options.overlay_labels(),
        }
    }

    pub fn coordinate(&self) -> &TileCoordinate {
        &self.coordinate
    }

    pub fn image_id(&self) -> &str {
        &self.coordinate.image_id
    }

    /// SHA-256 of the canonical textual form, hex encoded.
    ///
    /// Stable across processes; used as the HTTP `ETag` and in metadata
    /// records.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.to_string().as_bytes()))
    }
}

impl fmt::Display for CacheKey {
    /// `image_id:z:x:y:ops:threshold:overlay`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}:{}",
            self.coordinate.image_id,
            self.coordinate.z,
            self.coordinate.x,
            self.coordinate.y,
            self.operations,
            f32::from_bits(self.threshold_bits),
            self.overlay_labels
        )
    }
}
