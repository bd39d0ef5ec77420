//! Threshold segmentation of dark, roughly circular regions.
//!
//! The tile's luma is split with Otsu's method. Connected dark regions large
//! enough to matter become `crater` candidates. A candidate's confidence
//! blends how much darker it is than the bright background with how closely its
//! fill ratio matches a disc inscribed in its bounding box.

use std::collections::VecDeque;
use std::f32::consts::FRAC_PI_4;

use crate::error::OperationError;
use crate::tile::{OperationKind, PixelBuffer};

use super::provider::{Feature, Geometry, OperationOutput, OperationProvider};
use super::stats::{luminance, otsu};

/// Default minimum region area in pixels.
pub const DEFAULT_MIN_AREA: u32 = 16;

/// Default maximum number of reported regions.
pub const DEFAULT_MAX_REGIONS: usize = 64;

const VERSION: &str = "otsu-cc-1.0";

const CRATER_LABEL: &str = "crater";

#[derive(Debug, Clone)]
pub struct ThresholdSegmenter {
    min_area: u32,
    max_regions: usize,
}

struct Region {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    area: u32,
    luma_sum: u64,
}

impl ThresholdSegmenter {
    pub fn new(min_area: u32, max_regions: usize) -> Self {
        Self {
            min_area: min_area.max(1),
            max_regions,
        }
    }

    fn score(region: &Region, background: f32) -> f32 {
        let mean = region.luma_sum as f32 / region.area as f32;
        let contrast = if background <= 0.0 {
            0.0
        } else {
            ((background - mean) / background).clamp(0.0, 1.0)
        };

        let box_w = region.max_x - region.min_x + 1;
        let box_h = region.max_y - region.min_y + 1;
        let fill = region.area as f32 / (box_w * box_h) as f32;
        let aspect = box_w.min(box_h) as f32 / box_w.max(box_h) as f32;
        let roundness = (1.0 - (fill - FRAC_PI_4).abs() / FRAC_PI_4).clamp(0.0, 1.0) * aspect;

        0.5 * contrast + 0.5 * roundness
    }
}

impl Default for ThresholdSegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_AREA, DEFAULT_MAX_REGIONS)
    }
}

impl OperationProvider for ThresholdSegmenter {
    fn kind(&self) -> OperationKind {
        OperationKind::Segment
    }

    fn model_version(&self) -> &str {
        VERSION
    }

    fn run(&self, image: &PixelBuffer, threshold: f32) -> Result<OperationOutput, OperationError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(OperationError::EmptyImage);
        }

        let luma = luminance(image);
        let (cut, separability) = otsu(&luma);
        if separability == 0.0 {
            return Ok(OperationOutput::detected(Vec::new(), 0.0));
        }

        let (light_sum, light_count) = luma
            .iter()
            .filter(|&&v| v > cut)
            .fold((0u64, 0u64), |(sum, n), &v| (sum + u64::from(v), n + 1));
        let background = light_sum as f32 / light_count.max(1) as f32;

        let w = width as usize;
        let mut visited = vec![false; luma.len()];
        let mut queue = VecDeque::new();
        let mut features = Vec::new();

        for start in 0..luma.len() {
            if visited[start] || luma[start] > cut {
                continue;
            }
            visited[start] = true;
            queue.push_back(start);

            let mut region = Region {
                min_x: u32::MAX,
                min_y: u32::MAX,
                max_x: 0,
                max_y: 0,
                area: 0,
                luma_sum: 0,
            };

            while let Some(idx) = queue.pop_front() {
                let (x, y) = ((idx % w) as u32, (idx / w) as u32);
                region.min_x = region.min_x.min(x);
                region.min_y = region.min_y.min(y);
                region.max_x = region.max_x.max(x);
                region.max_y = region.max_y.max(y);
                region.area += 1;
                region.luma_sum += u64::from(luma[idx]);

                let neighbors = [
                    (x > 0).then(|| idx - 1),
                    (x + 1 < width).then(|| idx + 1),
                    (y > 0).then(|| idx - w),
                    (y + 1 < height).then(|| idx + w),
                ];
                for next in neighbors.into_iter().flatten() {
                    if !visited[next] && luma[next] <= cut {
                        visited[next] = true;
                        queue.push_back(next);
                    }
                }
            }

            if region.area < self.min_area {
                continue;
            }
            let confidence = Self::score(&region, background);
            if confidence >= threshold {
                features.push(Feature {
                    label: CRATER_LABEL.to_string(),
                    confidence,
                    geometry: Geometry::Extent {
                        x: region.min_x,
                        y: region.min_y,
                        width: region.max_x - region.min_x + 1,
                        height: region.max_y - region.min_y + 1,
                    },
                });
            }
        }

        // Stable sort keeps scan order among equal scores
        features.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        features.truncate(self.max_regions);

        Ok(OperationOutput::detected(features, separability))
    }
}
