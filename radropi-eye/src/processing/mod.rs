//! Per-frame processing: motion detection and multi-object tracking

pub mod motion;
pub mod tracker;

pub use motion::MotionDetector;
pub use tracker::{Track, TrackEvent, TrackManager, TrackUpdate};
