//! Background-subtraction motion detector

use crate::config::MotionConfig;
use crate::utils::{box_blur3, luma_plane};
use radropi_core::{BoundingBox, Frame, Region};
use tracing::{debug, warn};

/// Frames smaller than this in either dimension cannot be differenced
const MIN_FRAME_DIM: u32 = 3;

/// Motion detector owning a per-pixel running background model.
///
/// Only bright excursions above the background count as foreground, and the
/// background learns exclusively from pixels judged background, so a
/// persistent moving object is never absorbed into the model.
pub struct MotionDetector {
    config: MotionConfig,
    background: Vec<f32>,
    dims: Option<(u32, u32)>,
    /// EMA of the mean absolute deviation of background pixels
    noise: f32,
    /// Whether the low-light gain was applied to the seeding frame
    enhanced: bool,
    frames_seen: u64,
    frame_errors: u64,
}

impl MotionDetector {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            background: Vec::new(),
            dims: None,
            noise: 0.0,
            enhanced: false,
            frames_seen: 0,
            frame_errors: 0,
        }
    }

    /// Current foreground threshold in luma levels
    pub fn threshold(&self) -> f32 {
        (self.config.noise_multiplier * self.noise).max(self.config.min_threshold)
    }

    pub fn noise_level(&self) -> f32 {
        self.noise
    }

    /// Corrupt or undersized frames seen so far
    pub fn frame_errors(&self) -> u64 {
        self.frame_errors
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Drop the background model; the next frame re-seeds it
    pub fn reset(&mut self) {
        self.background.clear();
        self.dims = None;
        self.noise = 0.0;
    }

    /// Find candidate regions of motion in `frame`.
    ///
    /// Ordered by descending intensity, then top-to-bottom, left-to-right.
    /// A corrupt or undersized frame yields no regions.
    pub fn detect(&mut self, frame: &Frame) -> Vec<Region> {
        if frame.width < MIN_FRAME_DIM || frame.height < MIN_FRAME_DIM || !frame.is_well_formed() {
            self.frame_errors += 1;
            warn!(
                "Recoverable frame error: frame {} is {}x{} {:?} with {} bytes",
                frame.sequence,
                frame.width,
                frame.height,
                frame.format,
                frame.data.len()
            );
            return Vec::new();
        }
        self.frames_seen += 1;

        let width = frame.width as usize;
        let height = frame.height as usize;
        let (plane, enhanced) = self.preprocess(frame, width, height);

        if self.dims != Some((frame.width, frame.height)) || enhanced != self.enhanced {
            debug!("Seeding background model from frame {}", frame.sequence);
            self.seed(plane, frame.width, frame.height, enhanced);
            return Vec::new();
        }

        let threshold = self.threshold();
        let mut mask = vec![false; plane.len()];
        let mut foreground = 0usize;
        let mut noise_sum = 0.0f32;
        let mut noise_count = 0usize;

        for (i, (&value, &bg)) in plane.iter().zip(self.background.iter()).enumerate() {
            let deviation = value - bg;
            if deviation > threshold {
                mask[i] = true;
                foreground += 1;
            } else if deviation.abs() <= threshold {
                noise_sum += deviation.abs();
                noise_count += 1;
            }
        }

        if foreground as f32 > self.config.reseed_foreground_fraction * plane.len() as f32 {
            debug!(
                "Frame {}: {} of {} pixels changed, treating as a lighting change",
                frame.sequence,
                foreground,
                plane.len()
            );
            self.seed(plane, frame.width, frame.height, enhanced);
            return Vec::new();
        }

        if noise_count > 0 {
            let sample = noise_sum / noise_count as f32;
            self.noise += self.config.noise_alpha * (sample - self.noise);
        }

        let regions = self.extract_regions(&plane, &mask, width, height);

        let alpha = self.config.background_alpha;
        for ((bg, &value), &is_fg) in self.background.iter_mut().zip(plane.iter()).zip(mask.iter()) {
            if !is_fg {
                *bg += alpha * (value - *bg);
            }
        }

        debug!(
            "Frame {}: {} regions, threshold {:.1}",
            frame.sequence,
            regions.len(),
            threshold
        );
        regions
    }

    fn preprocess(&self, frame: &Frame, width: usize, height: usize) -> (Vec<f32>, bool) {
        let mut plane = luma_plane(frame);
        if self.config.denoise {
            plane = box_blur3(&plane, width, height);
        }

        let mut enhanced = false;
        if self.config.low_light_enhancement && !plane.is_empty() {
            let mean = plane.iter().sum::<f32>() / plane.len() as f32;
            if mean < self.config.low_light_level {
                let gain = self.config.low_light_gain;
                for value in plane.iter_mut() {
                    *value = (*value * gain).min(255.0);
                }
                enhanced = true;
            }
        }
        (plane, enhanced)
    }

    fn seed(&mut self, plane: Vec<f32>, width: u32, height: u32, enhanced: bool) {
        self.background = plane;
        self.dims = Some((width, height));
        self.enhanced = enhanced;
        self.noise = 0.0;
    }

    /// Group foreground pixels into 8-connected components
    fn extract_regions(&self, plane: &[f32], mask: &[bool], width: usize, height: usize) -> Vec<Region> {
        let mut visited = vec![false; mask.len()];
        let mut stack = Vec::new();
        let mut regions = Vec::new();

        for start in 0..mask.len() {
            if !mask[start] || visited[start] {
                continue;
            }

            visited[start] = true;
            stack.push(start);

            let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
            let (mut max_x, mut max_y) = (0usize, 0usize);
            let mut area = 0u32;
            let mut excess_sum = 0.0f32;
            let mut brightness_sum = 0.0f32;
            let mut peak = 0.0f32;

            while let Some(idx) = stack.pop() {
                let x = idx % width;
                let y = idx / width;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                area += 1;
                excess_sum += plane[idx] - self.background[idx];
                brightness_sum += plane[idx];
                peak = peak.max(plane[idx]);

                for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                    for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                        let n = ny * width + nx;
                        if mask[n] && !visited[n] {
                            visited[n] = true;
                            stack.push(n);
                        }
                    }
                }
            }

            if area < self.config.min_area || area > self.config.max_area {
                continue;
            }

            regions.push(Region {
                bbox: BoundingBox::new(
                    min_x as f32,
                    min_y as f32,
                    (max_x - min_x + 1) as f32,
                    (max_y - min_y + 1) as f32,
                ),
                area,
                intensity: excess_sum / area as f32,
                peak,
                mean_brightness: brightness_sum / area as f32,
            });
        }

        regions.sort_by(|a, b| {
            b.intensity
                .total_cmp(&a.intensity)
                .then(a.bbox.y.total_cmp(&b.bbox.y))
                .then(a.bbox.x.total_cmp(&b.bbox.x))
        });
        regions
    }
}
