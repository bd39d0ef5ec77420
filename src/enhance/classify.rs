//! Rule-based terrain classification.
//!
//! Four tile statistics (brightness, texture, redness, dark fraction) are
//! combined linearly into one logit per terrain class and normalised with a
//! softmax. Classes whose probability reaches the threshold are reported as
//! whole-tile features.

use crate::error::OperationError;
use crate::tile::{OperationKind, PixelBuffer};

use super::provider::{Feature, Geometry, OperationOutput, OperationProvider};
use super::stats::{luminance, mean_std};

const VERSION: &str = "terrain-rules-1.0";

/// Terrain classes, in report order.
pub const TERRAIN_LABELS: [&str; 3] = ["crater", "lava_flow", "dust_storm"];

/// Softmax temperature; lower values sharpen the distribution.
const TEMPERATURE: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq)]
struct TileStats {
    /// Mean luma in [0, 1]
    brightness: f32,
    /// Luma standard deviation in [0, 1]
    texture: f32,
    /// Mean of red minus the green/blue average, in [-1, 1]
    redness: f32,
    /// Fraction of pixels with luma below 64
    dark_fraction: f32,
}

impl TileStats {
    fn measure(image: &PixelBuffer) -> Self {
        let luma = luminance(image);
        let (mean, std) = mean_std(&luma);
        let dark = luma.iter().filter(|&&v| v < 64).count() as f32 / luma.len() as f32;
        let redness = image
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                f32::from(r) - (f32::from(g) + f32::from(b)) / 2.0
            })
            .sum::<f32>()
            / (luma.len() as f32 * 255.0);

        Self {
            brightness: mean / 255.0,
            texture: (std / 127.5).min(1.0),
            redness,
            dark_fraction: dark,
        }
    }

    fn logits(&self) -> [f32; 3] {
        [
            // crater: rough surface with shadowed interiors
            1.5 * self.texture + 1.0 * self.dark_fraction - 0.5 * self.redness,
            // lava_flow: dark and smooth
            1.2 * (1.0 - self.brightness) + 0.8 * (1.0 - self.texture) - 0.5 * self.dark_fraction,
            // dust_storm: bright, hazy and reddish
            1.0 * self.brightness + 1.0 * (1.0 - self.texture) + 1.5 * self.redness,
        ]
    }
}

fn softmax(logits: [f32; 3]) -> [f32; 3] {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps = logits.map(|l| ((l - max) / TEMPERATURE).exp());
    let sum: f32 = exps.iter().sum();
    exps.map(|e| e / sum)
}

#[derive(Debug, Clone, Default)]
pub struct TerrainClassifier;

impl TerrainClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Probability of each label in [`TERRAIN_LABELS`] for a tile.
    pub fn probabilities(&self, image: &PixelBuffer) -> [f32; 3] {
        softmax(TileStats::measure(image).logits())
    }
}

impl OperationProvider for TerrainClassifier {
    fn kind(&self) -> OperationKind {
        OperationKind::Classify
    }

    fn model_version(&self) -> &str {
        VERSION
    }

    fn run(&self, image: &PixelBuffer, threshold: f32) -> Result<OperationOutput, OperationError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(OperationError::EmptyImage);
        }

        let probabilities = self.probabilities(image);
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(OperationError::Inference(
                "non-finite class probability".to_string(),
            ));
        }

        let top = probabilities.iter().copied().fold(0.0, f32::max);
        let features = TERRAIN_LABELS
            .iter()
            .zip(probabilities)
            .filter(|(_, p)| *p >= threshold)
            .map(|(label, confidence)| Feature {
                label: label.to_string(),
                confidence,
                geometry: Geometry::Tile,
            })
            .collect();

        Ok(OperationOutput::detected(features, top))
    }
}
