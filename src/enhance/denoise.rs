//! Median-filter denoising.

use crate::error::OperationError;
use crate::tile::{OperationKind, PixelBuffer};

use super::provider::{OperationOutput, OperationProvider};
use super::stats::mean_abs_diff;

/// Default filter radius (3x3 window).
pub const DEFAULT_RADIUS: u32 = 1;

/// Largest supported radius (9x9 window).
const MAX_RADIUS: u32 = 4;

/// Per-channel median filter with edge clamping.
///
/// Confidence is `1 - mean |input - output| / 255`: the less of the tile the
/// filter had to replace, the more certain it is that only noise was removed.
#[derive(Debug, Clone)]
pub struct MedianDenoiser {
    radius: u32,
    version: String,
}

impl MedianDenoiser {
    pub fn new(radius: u32) -> Self {
        let radius = radius.clamp(1, MAX_RADIUS);
        let window = 2 * radius + 1;
        Self {
            radius,
            version: format!("median-{}x{}", window, window),
        }
    }
}

impl Default for MedianDenoiser {
    fn default() -> Self {
        Self::new(DEFAULT_RADIUS)
    }
}

impl OperationProvider for MedianDenoiser {
    fn kind(&self) -> OperationKind {
        OperationKind::Denoise
    }

    fn model_version(&self) -> &str {
        &self.version
    }

    fn run(&self, image: &PixelBuffer, _threshold: f32) -> Result<OperationOutput, OperationError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(OperationError::EmptyImage);
        }

        let r = self.radius as i64;
        let window = ((2 * r + 1) * (2 * r + 1)) as usize;
        let mut samples: [Vec<u8>; 3] = [
            Vec::with_capacity(window),
            Vec::with_capacity(window),
            Vec::with_capacity(window),
        ];

        let mut output = PixelBuffer::new(width, height);
        for y in 0..height {
            for x in 0..width {
                for channel in samples.iter_mut() {
                    channel.clear();
                }
                for dy in -r..=r {
                    let sy = (i64::from(y) + dy).clamp(0, i64::from(height) - 1) as u32;
                    for dx in -r..=r {
                        let sx = (i64::from(x) + dx).clamp(0, i64::from(width) - 1) as u32;
                        let p = image.get_pixel(sx, sy);
                        for (c, channel) in samples.iter_mut().enumerate() {
                            channel.push(p[c]);
                        }
                    }
                }
                let out = output.get_pixel_mut(x, y);
                for (c, channel) in samples.iter_mut().enumerate() {
                    let mid = channel.len() / 2;
                    out[c] = *channel.select_nth_unstable(mid).1;
                }
            }
        }

        let confidence = 1.0 - mean_abs_diff(image, &output) / 255.0;
        Ok(OperationOutput::transformed(output, confidence))
    }
}
