//! radropi-eye: vision side of the radropi sky watcher
//!
//! Turns a stream of sky frames into persistent object tracks:
//! frame sources (live camera, replay or synthetic), a background-subtraction
//! motion detector, a timeout-guarded classifier capability and the
//! multi-object track manager.

pub mod annotate;
pub mod camera;
#[cfg(feature = "capture")]
pub mod capture;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod processing;
pub mod synthetic;
mod utils;

pub use camera::{FrameClock, FramePacer, FrameSource, Pacing, ReplayFrameSource};
#[cfg(feature = "capture")]
pub use capture::{CaptureFrameSource, CaptureSettings};
pub use config::{CameraConfig, ClassifierConfig, MotionConfig, TrackingConfig, VisionConfig};
pub use error::VisionError;
pub use models::{
    ClassificationRequest, Classifier, ClassifierRunner, ClassifierStats, ClassifierStatsSnapshot,
    CroppedRegion, FixedClassifier, HeuristicClassifier,
};
pub use pipeline::{PerceptionOutcome, PerceptionPipeline};
pub use processing::{MotionDetector, Track, TrackEvent, TrackManager, TrackUpdate};
pub use synthetic::{SyntheticFrameSource, SyntheticObject, SyntheticScene};
