//! Super-resolution by Lanczos resampling.
//!
//! Confidence measures how faithfully the upscaled tile reproduces its
//! source: the output is downsampled back to the input size and compared
//! pixel by pixel.

use image::imageops::{self, FilterType};

use crate::error::OperationError;
use crate::tile::{OperationKind, PixelBuffer};

use super::provider::{OperationOutput, OperationProvider};
use super::stats::mean_abs_diff;

/// Default upscale factor.
pub const DEFAULT_SCALE: u32 = 2;

/// Default maximum output side in pixels.
pub const DEFAULT_MAX_SIDE: u32 = 4096;

/// Lanczos3 upscaler.
#[derive(Debug, Clone)]
pub struct LanczosUpscaler {
    scale: u32,
    max_side: u32,
    version: String,
}

impl LanczosUpscaler {
    /// Create an upscaler. A scale below 1 is treated as 1.
    pub fn new(scale: u32, max_side: u32) -> Self {
        let scale = scale.max(1);
        Self {
            scale,
            max_side,
            version: format!("lanczos3-x{}", scale),
        }
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }
}

impl Default for LanczosUpscaler {
    fn default() -> Self {
        Self::new(DEFAULT_SCALE, DEFAULT_MAX_SIDE)
    }
}

impl OperationProvider for LanczosUpscaler {
    fn kind(&self) -> OperationKind {
        OperationKind::SuperRes
    }

    fn model_version(&self) -> &str {
        &self.version
    }

    fn run(&self, image: &PixelBuffer, _threshold: f32) -> Result<OperationOutput, OperationError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(OperationError::EmptyImage);
        }

        let out_w = width.saturating_mul(self.scale);
        let out_h = height.saturating_mul(self.scale);
        if out_w > self.max_side || out_h > self.max_side {
            return Err(OperationError::TooLarge {
                width: out_w,
                height: out_h,
                max: self.max_side,
            });
        }

        let upscaled = imageops::resize(image, out_w, out_h, FilterType::Lanczos3);
        let roundtrip = imageops::resize(&upscaled, width, height, FilterType::Triangle);
        let confidence = 1.0 - mean_abs_diff(image, &roundtrip) / 255.0;

        Ok(OperationOutput::transformed(upscaled, confidence))
    }
}
