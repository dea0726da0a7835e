//! radropi-core: shared data model for the radropi sky watcher
//!
//! Every stage of the perception loop (frame source, motion detector,
//! classifier, track manager, servo controller, event logger) exchanges the
//! value types defined here.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    BoundingBox, Category, CategoryCounts, Classification, Frame, LogEntry, LogReason,
    PixelFormat, PositionFix, Region, TrackId, TrackSnapshot, TrackState, TrackingCommand,
};
