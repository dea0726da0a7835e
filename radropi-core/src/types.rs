//! Value types shared across the perception loop

use crate::error::Error;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Track identity. Allocated monotonically, never reused within a run.
pub type TrackId = u64;

/// Object category reported by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    NonMeteor,
    Meteor,
    Asteroid,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::NonMeteor, Category::Meteor, Category::Asteroid];

    /// Steering priority: rarer, more consequential objects rank higher
    pub fn priority(self) -> u8 {
        match self {
            Category::NonMeteor => 0,
            Category::Meteor => 1,
            Category::Asteroid => 2,
        }
    }

    /// Whether a confirmed track of this category qualifies for logging by default
    pub fn is_significant(self) -> bool {
        matches!(self, Category::Meteor | Category::Asteroid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::NonMeteor => "non_meteor",
            Category::Meteor => "meteor",
            Category::Asteroid => "asteroid",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "non_meteor" | "non-meteor" | "nonmeteor" => Ok(Category::NonMeteor),
            "meteor" => Ok(Category::Meteor),
            "asteroid" => Ok(Category::Asteroid),
            other => Err(Error::Parse(format!("unknown category '{}'", other))),
        }
    }
}

/// Classifier verdict for one region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    /// Always within [0, 1]
    pub confidence: f32,
}

impl Classification {
    /// Create a classification, clamping confidence into [0, 1] (NaN becomes 0)
    pub fn new(category: Category, confidence: f32) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self { category, confidence }
    }

    /// Result used when the classifier times out or fails
    pub fn fallback() -> Self {
        Self {
            category: Category::NonMeteor,
            confidence: 0.0,
        }
    }
}

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// One byte of luminance per pixel
    Gray8,
    /// Three bytes per pixel, R G B
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 3,
        }
    }
}

/// One captured image. Immutable once produced.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Bytes,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(
        sequence: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
        data: impl Into<Bytes>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sequence,
            width,
            height,
            format,
            data: data.into(),
            captured_at,
        }
    }

    /// Buffer length implied by the header, `None` on overflow
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.format.bytes_per_pixel())
    }

    /// Whether the buffer length agrees with width, height and format
    pub fn is_well_formed(&self) -> bool {
        self.expected_len() == Some(self.data.len())
    }

    /// Frame center in pixel coordinates
    pub fn center(&self) -> (f32, f32) {
        (self.width as f32 / 2.0, self.height as f32 / 2.0)
    }

    /// Luminance of a pixel, `None` outside the frame or for a malformed buffer
    pub fn luma(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height || !self.is_well_formed() {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * self.format.bytes_per_pixel();
        match self.format {
            PixelFormat::Gray8 => self.data.get(idx).copied(),
            PixelFormat::Rgb8 => {
                let px = self.data.get(idx..idx + 3)?;
                Some(rgb_to_luma(px[0], px[1], px[2]))
            }
        }
    }
}

/// ITU-R BT.601 luma with integer weights
pub fn rgb_to_luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}

/// Axis-aligned box in pixel coordinates (x, y is the top-left corner)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        }
    }

    /// Same size box moved so its center sits at (cx, cy)
    pub fn recentered(&self, cx: f32, cy: f32) -> Self {
        Self {
            x: cx - self.width / 2.0,
            y: cy - self.height / 2.0,
            width: self.width,
            height: self.height,
        }
    }
}

/// Candidate area of motion found in a single frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub bbox: BoundingBox,
    /// Number of foreground pixels in the connected component
    pub area: u32,
    /// Mean brightness excess over the background model
    pub intensity: f32,
    /// Brightest pixel in the component
    pub peak: f32,
    /// Mean brightness of the component pixels
    pub mean_brightness: f32,
}

/// Track lifecycle state. Removal is terminal and leaves no state behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    Tentative,
    Confirmed,
    Stale,
}

/// Immutable copy of a track, handed to the servo controller and logger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSnapshot {
    pub id: TrackId,
    pub bbox: BoundingBox,
    /// Smoothed velocity in pixels per second
    pub velocity: (f32, f32),
    pub category: Category,
    pub confidence: f32,
    pub state: TrackState,
    /// Cycles since the track was last matched
    pub age: u32,
    /// Consecutive matched cycles
    pub hits: u32,
    /// Cycles since creation
    pub lifetime: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl TrackSnapshot {
    pub fn classification(&self) -> Classification {
        Classification::new(self.category, self.confidence)
    }
}

/// Steering correction for the dish, derived from the primary track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingCommand {
    pub track_id: TrackId,
    pub pan_delta_deg: f32,
    pub tilt_delta_deg: f32,
    pub issued_at: DateTime<Utc>,
    /// True when either axis was clamped at its travel limit
    pub saturated: bool,
}

/// Position/time snapshot from the positioning service
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude_m: Option<f64>,
    pub satellites: u8,
    pub fix_quality: u8,
    pub hdop: Option<f32>,
    pub fix_valid: bool,
    pub timestamp: DateTime<Utc>,
}

impl PositionFix {
    /// "Position unknown" at the given time
    pub fn unknown(timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude: None,
            longitude: None,
            altitude_m: None,
            satellites: 0,
            fix_quality: 0,
            hdop: None,
            fix_valid: false,
            timestamp,
        }
    }

    /// Coordinates, only when the fix is valid
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        if !self.fix_valid {
            return None;
        }
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    /// Same reading with validity withdrawn and coordinates dropped
    pub fn invalidated(&self) -> Self {
        Self {
            fix_valid: false,
            latitude: None,
            longitude: None,
            altitude_m: None,
            ..*self
        }
    }
}

/// Why a log entry was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogReason {
    /// A confirmed track qualified for logging for the first time
    Detection,
    /// The voted category of an already logged track changed
    CategoryChange { previous: Category },
}

/// Record of one qualifying detection. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub frame_sequence: u64,
    pub track: TrackSnapshot,
    pub classification: Classification,
    pub position: PositionFix,
    pub reason: LogReason,
    /// File name of the annotated frame, relative to the images directory
    pub image_ref: Option<String>,
}

impl LogEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        frame_sequence: u64,
        track: TrackSnapshot,
        position: PositionFix,
        reason: LogReason,
        with_image: bool,
    ) -> Self {
        let classification = track.classification();
        let image_ref = with_image.then(|| {
            format!(
                "{}_t{}_{}_{:.2}.png",
                timestamp.format("%Y%m%d_%H%M%S_%3f"),
                track.id,
                classification.category,
                classification.confidence
            )
        });
        Self {
            timestamp,
            frame_sequence,
            track,
            classification,
            position,
            reason,
            image_ref,
        }
    }
}

/// Per-category tally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub non_meteor: u64,
    pub meteor: u64,
    pub asteroid: u64,
}

impl CategoryCounts {
    pub fn increment(&mut self, category: Category) {
        match category {
            Category::NonMeteor => self.non_meteor += 1,
            Category::Meteor => self.meteor += 1,
            Category::Asteroid => self.asteroid += 1,
        }
    }

    pub fn get(&self, category: Category) -> u64 {
        match category {
            Category::NonMeteor => self.non_meteor,
            Category::Meteor => self.meteor,
            Category::Asteroid => self.asteroid,
        }
    }

    pub fn total(&self) -> u64 {
        self.non_meteor + self.meteor + self.asteroid
    }
}
