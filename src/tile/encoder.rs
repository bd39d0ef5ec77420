//! Tile codec.
//!
//! Fetched tiles arrive as encoded bytes (JPEG or PNG) and are decoded into an
//! RGB [`PixelBuffer`] for the operation pipeline. Rendered tiles are encoded
//! back to JPEG for HTTP clients.
//!
//! # Design Decisions
//!
//! - **RGB only**: Alpha and grayscale sources are converted to 8-bit RGB so every
//!   provider sees one pixel layout.
//!
//! - **Quality control**: JPEG quality is configurable per server, allowing
//!   operators to trade off file size vs image quality.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::error::CodecError;

/// Decoded tile pixels passed between pipeline stages.
pub type PixelBuffer = RgbImage;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Decode an encoded tile into RGB pixels.
///
/// The container format is detected from the data itself.
pub fn decode_tile(data: &[u8]) -> Result<PixelBuffer, CodecError> {
    let img = image::load_from_memory(data).map_err(|e| CodecError::Decode {
        message: e.to_string(),
    })?;
    Ok(img.to_rgb8())
}

// =============================================================================
// JPEG Encoder
// =============================================================================

/// JPEG encoder for rendered tiles.
#[derive(Debug, Clone)]
pub struct JpegTileEncoder {
    quality: u8,
}

impl JpegTileEncoder {
    /// Create an encoder at the default quality.
    pub fn new() -> Self {
        Self::with_quality(DEFAULT_JPEG_QUALITY)
    }

    /// Create an encoder at the given quality, clamped to 1-100.
    pub fn with_quality(quality: u8) -> Self {
        Self {
            quality: clamp_quality(quality),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode pixels as JPEG.
    pub fn encode(&self, pixels: &PixelBuffer) -> Result<Bytes, CodecError> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(CodecError::Encode {
                message: "image has zero width or height".to_string(),
            });
        }

        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, self.quality);

        encoder
            .encode_image(pixels)
            .map_err(|e| CodecError::Encode {
                message: e.to_string(),
            })?;

        Ok(Bytes::from(output))
    }
}

impl Default for JpegTileEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate JPEG quality parameter.
///
/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}
