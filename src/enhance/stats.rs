//! Pixel statistics shared by the built-in providers.

use crate::tile::PixelBuffer;

/// Mean absolute per-channel difference between two equally sized buffers.
///
/// Returns 255 when the sizes differ.
pub(crate) fn mean_abs_diff(a: &PixelBuffer, b: &PixelBuffer) -> f32 {
    if a.dimensions() != b.dimensions() || a.as_raw().is_empty() {
        return 255.0;
    }
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&p, &q)| u64::from(p.abs_diff(q)))
        .sum();
    (total as f64 / a.as_raw().len() as f64) as f32
}

/// Rec. 601 luma of every pixel, row-major.
pub(crate) fn luminance(image: &PixelBuffer) -> Vec<u8> {
    image
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            ((299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b)) / 1000) as u8
        })
        .collect()
}

/// Otsu's threshold over a luma histogram.
///
/// Returns `(threshold, separability)` where separability is the
/// between-class variance divided by the total variance, in [0, 1]. Pixels
/// with luma `<= threshold` form the dark class.
pub(crate) fn otsu(luma: &[u8]) -> (u8, f32) {
    let mut histogram = [0u64; 256];
    for &v in luma {
        histogram[v as usize] += 1;
    }
    let total = luma.len() as f64;
    if total == 0.0 {
        return (0, 0.0);
    }

    let sum_all: f64 = histogram
        .iter()
        .enumerate()
        .map(|(v, &n)| v as f64 * n as f64)
        .sum();
    let mean = sum_all / total;
    let total_variance: f64 = histogram
        .iter()
        .enumerate()
        .map(|(v, &n)| n as f64 * (v as f64 - mean).powi(2))
        .sum::<f64>()
        / total;
    if total_variance <= f64::EPSILON {
        return (luma[0], 0.0);
    }

    let mut best = (0u8, 0.0f64);
    let mut weight_dark = 0.0;
    let mut sum_dark = 0.0;
    for (v, &n) in histogram.iter().enumerate() {
        weight_dark += n as f64;
        sum_dark += v as f64 * n as f64;
        let weight_light = total - weight_dark;
        if weight_dark == 0.0 || weight_light == 0.0 {
            continue;
        }
        let mean_dark = sum_dark / weight_dark;
        let mean_light = (sum_all - sum_dark) / weight_light;
        let between = weight_dark * weight_light * (mean_dark - mean_light).powi(2) / (total * total);
        if between > best.1 {
            best = (v as u8, between);
        }
    }

    (best.0, (best.1 / total_variance).clamp(0.0, 1.0) as f32)
}

/// Mean and standard deviation of a sample.
pub(crate) fn mean_std(values: &[u8]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|&v| (f64::from(v) - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean as f32, variance.sqrt() as f32)
}
