//! Per-frame perception: detect, classify, track

use crate::config::VisionConfig;
use crate::models::ClassifierRunner;
use crate::processing::{MotionDetector, TrackManager, TrackUpdate};
use radropi_core::{Classification, Frame, Region, TrackSnapshot};
use tracing::debug;

/// Everything one perception cycle produced
#[derive(Debug, Clone, Default)]
pub struct PerceptionOutcome {
    pub regions: Vec<Region>,
    /// One per entry of `regions`, same order
    pub classifications: Vec<Classification>,
    pub update: TrackUpdate,
    /// Snapshot of the primary track after the update
    pub primary: Option<TrackSnapshot>,
    /// The frame was corrupt or undersized and contributed no regions
    pub frame_error: bool,
}

/// Motion detector, classifier runner and track manager wired in cycle order.
///
/// Classification is the only await point; the track update runs to
/// completion once every classification has resolved or timed out.
pub struct PerceptionPipeline {
    detector: MotionDetector,
    runner: ClassifierRunner,
    tracker: TrackManager,
    max_regions: usize,
}

impl PerceptionPipeline {
    pub fn new(config: &VisionConfig, runner: ClassifierRunner) -> Self {
        Self {
            detector: MotionDetector::new(config.motion.clone()),
            runner,
            tracker: TrackManager::new(config.tracking.clone()),
            max_regions: config.classifier.max_regions_per_frame,
        }
    }

    pub async fn process(&mut self, frame: &Frame) -> PerceptionOutcome {
        let errors_before = self.detector.frame_errors();
        let mut regions = self.detector.detect(frame);
        let frame_error = self.detector.frame_errors() > errors_before;

        if regions.len() > self.max_regions {
            debug!(
                "Frame {}: keeping {} of {} regions",
                frame.sequence,
                self.max_regions,
                regions.len()
            );
            regions.truncate(self.max_regions);
        }

        let classifications = if regions.is_empty() {
            Vec::new()
        } else {
            self.runner.classify_all(frame, &regions).await
        };

        let observations: Vec<(Region, Classification)> =
            regions.iter().copied().zip(classifications.iter().copied()).collect();
        let update = self.tracker.update(&observations, frame.captured_at);
        let primary = update.primary.and_then(|id| self.tracker.snapshot(id));

        PerceptionOutcome {
            regions,
            classifications,
            update,
            primary,
            frame_error,
        }
    }

    pub fn tracker(&self) -> &TrackManager {
        &self.tracker
    }

    pub fn detector(&self) -> &MotionDetector {
        &self.detector
    }

    pub fn runner(&self) -> &ClassifierRunner {
        &self.runner
    }
}
