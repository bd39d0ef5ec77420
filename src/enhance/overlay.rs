//! Label overlays drawn onto the final tile.

use image::Rgb;

use crate::tile::PixelBuffer;

use super::provider::{Feature, Geometry};

/// Overlay stroke colour.
pub const OVERLAY_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Overlay stroke width in pixels.
pub const STROKE_WIDTH: u32 = 2;

/// Draw every feature at or above `threshold` onto `image`.
///
/// Extents are outlined; whole-tile labels frame the tile border. Features are
/// expressed in the coordinates of the buffer they were detected on, so
/// `source_size` is used to rescale them onto `image` when the two differ
/// (for example after super-resolution).
///
/// Returns the number of features drawn.
pub fn draw_feature_overlays(
    image: &mut PixelBuffer,
    features: &[Feature],
    threshold: f32,
    source_size: (u32, u32),
) -> usize {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return 0;
    }
    let sx = width as f32 / source_size.0.max(1) as f32;
    let sy = height as f32 / source_size.1.max(1) as f32;

    let mut drawn = 0;
    for feature in features.iter().filter(|f| f.confidence >= threshold) {
        match feature.geometry {
            Geometry::Extent {
                x,
                y,
                width: w,
                height: h,
            } => {
                let x0 = (x as f32 * sx) as u32;
                let y0 = (y as f32 * sy) as u32;
                let x1 = ((x.saturating_add(w) as f32 * sx).ceil() as u32).max(x0.saturating_add(1));
                let y1 = ((y.saturating_add(h) as f32 * sy).ceil() as u32).max(y0.saturating_add(1));
                stroke_rect(image, x0, y0, x1, y1);
            }
            Geometry::Tile => stroke_rect(image, 0, 0, width, height),
        }
        drawn += 1;
    }
    drawn
}

/// Outline the half-open rectangle `[x0, x1) x [y0, y1)`, clipped to the image.
fn stroke_rect(image: &mut PixelBuffer, x0: u32, y0: u32, x1: u32, y1: u32) {
    let (width, height) = image.dimensions();
    let x1 = x1.min(width);
    let y1 = y1.min(height);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    for y in y0..y1 {
        for x in x0..x1 {
            let on_edge = x < x0 + STROKE_WIDTH
                || x + STROKE_WIDTH >= x1
                || y < y0 + STROKE_WIDTH
                || y + STROKE_WIDTH >= y1;
            if on_edge {
                image.put_pixel(x, y, OVERLAY_COLOR);
            }
        }
    }
}
