//! Object classification capability

use crate::error::VisionError;
use crate::utils::pixel_window;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use radropi_core::{Category, Classification, Frame, Region};

/// Luma crop around a candidate region
#[derive(Debug, Clone, PartialEq)]
pub struct CroppedRegion {
    pub width: u32,
    pub height: u32,
    /// Row-major luminance
    pub pixels: Vec<u8>,
}

impl CroppedRegion {
    /// Cut the region's box (plus padding) out of a frame.
    /// Returns `None` for a malformed frame or a box that misses it entirely.
    pub fn from_frame(frame: &Frame, region: &Region, padding: u32) -> Option<Self> {
        if !frame.is_well_formed() {
            return None;
        }
        let (x0, y0, x1, y1) = pixel_window(&region.bbox, padding, frame.width, frame.height)?;
        let mut pixels = Vec::with_capacity(((x1 - x0) * (y1 - y0)) as usize);
        for y in y0..y1 {
            for x in x0..x1 {
                pixels.push(frame.luma(x, y)?);
            }
        }
        Some(Self {
            width: x1 - x0,
            height: y1 - y0,
            pixels,
        })
    }

    pub fn mean(&self) -> f32 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        self.pixels.iter().map(|&p| p as f32).sum::<f32>() / self.pixels.len() as f32
    }
}

/// Everything a classifier gets to see about one region
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub crop: CroppedRegion,
    pub region: Region,
    pub frame_sequence: u64,
    pub captured_at: DateTime<Utc>,
}

/// Opaque classification capability.
///
/// Implementations may be slow or unreliable; callers wrap them in a
/// [`ClassifierRunner`](crate::models::ClassifierRunner) which enforces the
/// latency budget and substitutes the fallback result.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Warm-up hook called once at startup
    async fn load(&self) -> Result<(), VisionError> {
        Ok(())
    }

    async fn classify(&self, request: &ClassificationRequest) -> Result<Classification, VisionError>;
}

/// Always answers with the same result
#[derive(Debug, Clone)]
pub struct FixedClassifier {
    result: Classification,
}

impl FixedClassifier {
    pub fn new(category: Category, confidence: f32) -> Self {
        Self {
            result: Classification::new(category, confidence),
        }
    }
}

#[async_trait]
impl Classifier for FixedClassifier {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn classify(&self, _request: &ClassificationRequest) -> Result<Classification, VisionError> {
        Ok(self.result)
    }
}

/// Rule-based stand-in for a trained model, keyed on brightness, area and
/// elongation of the region
#[derive(Debug, Clone, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(brightness: f32, area: u32, aspect_ratio: f32) -> Classification {
        if brightness > 200.0 && area > 100 {
            if aspect_ratio > 2.0 {
                Classification::new(Category::Meteor, 0.8)
            } else if area > 500 {
                Classification::new(Category::Asteroid, 0.7)
            } else {
                Classification::new(Category::Meteor, 0.6)
            }
        } else if brightness > 150.0 {
            Classification::new(Category::Meteor, 0.5)
        } else {
            Classification::new(Category::NonMeteor, 0.9)
        }
    }
}

#[async_trait]
impl Classifier for HeuristicClassifier {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn classify(&self, request: &ClassificationRequest) -> Result<Classification, VisionError> {
        let region = &request.region;
        let brightness = if region.mean_brightness > 0.0 {
            region.mean_brightness
        } else {
            request.crop.mean()
        };
        Ok(Self::evaluate(brightness, region.area, region.bbox.aspect_ratio()))
    }
}
