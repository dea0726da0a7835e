//! Frame acquisition

use crate::config::CameraConfig;
use crate::error::VisionError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use radropi_core::{Frame, PixelFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Producer of timestamped frames.
///
/// `next_frame` returns `Ok(None)` at end of stream. An `Err` for which
/// [`VisionError::is_transient`] holds is an acquisition fault the caller may
/// keep pulling through; any other `Err` ends the stream.
#[async_trait]
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    async fn open(&mut self) -> Result<(), VisionError>;

    async fn next_frame(&mut self) -> Result<Option<Frame>, VisionError>;

    async fn close(&mut self) -> Result<(), VisionError>;
}

/// Whether a source waits out the frame interval between frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pacing {
    RealTime,
    Immediate,
}

/// Sleeps until the next frame slot. The first frame is released immediately.
#[derive(Debug)]
pub struct FramePacer {
    interval: Duration,
    pacing: Pacing,
    next_deadline: Option<tokio::time::Instant>,
}

impl FramePacer {
    pub fn new(interval: Duration, pacing: Pacing) -> Self {
        Self {
            interval,
            pacing,
            next_deadline: None,
        }
    }

    pub async fn wait(&mut self) {
        if self.pacing == Pacing::Immediate {
            return;
        }
        let now = tokio::time::Instant::now();
        match self.next_deadline {
            None => self.next_deadline = Some(now + self.interval),
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                // fall behind gracefully instead of bursting to catch up
                let next = deadline + self.interval;
                self.next_deadline = Some(if next < now { now + self.interval } else { next });
            }
        }
    }

    pub fn reset(&mut self) {
        self.next_deadline = None;
    }
}

/// Nominal capture time of a frame: start + interval × sequence
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    start: DateTime<Utc>,
    interval: Duration,
}

impl FrameClock {
    pub fn new(start: DateTime<Utc>, interval: Duration) -> Self {
        Self { start, interval }
    }

    pub fn timestamp(&self, sequence: u64) -> DateTime<Utc> {
        let micros = (self.interval.as_micros() as i64).saturating_mul(sequence as i64);
        self.start + chrono::Duration::microseconds(micros)
    }
}

const REPLAY_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Replays a directory of recorded sky images in lexical file-name order,
/// converted to 8-bit luminance
pub struct ReplayFrameSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    sequence: u64,
    pacer: FramePacer,
    clock: Option<FrameClock>,
    interval: Duration,
    open: bool,
}

impl ReplayFrameSource {
    pub fn new(dir: impl Into<PathBuf>, config: &CameraConfig) -> Self {
        let interval = config.frame_interval();
        Self {
            dir: dir.into(),
            files: Vec::new(),
            cursor: 0,
            sequence: 0,
            pacer: FramePacer::new(interval, config.pacing),
            clock: None,
            interval,
            open: false,
        }
    }

    fn is_image(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| REPLAY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// Frames left to replay
    pub fn remaining(&self) -> usize {
        self.files.len().saturating_sub(self.cursor)
    }
}

#[async_trait]
impl FrameSource for ReplayFrameSource {
    fn name(&self) -> &str {
        "replay"
    }

    async fn open(&mut self) -> Result<(), VisionError> {
        if !self.dir.is_dir() {
            return Err(VisionError::Camera(format!(
                "Replay directory {:?} does not exist",
                self.dir
            )));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && Self::is_image(&path) {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(VisionError::Camera(format!(
                "Replay directory {:?} contains no images",
                self.dir
            )));
        }

        info!("Replay source opened {:?} with {} frames", self.dir, files.len());
        self.files = files;
        self.cursor = 0;
        self.sequence = 0;
        self.clock = Some(FrameClock::new(Utc::now(), self.interval));
        self.pacer.reset();
        self.open = true;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, VisionError> {
        if !self.open {
            return Err(VisionError::Camera("Replay source is not open".to_string()));
        }
        let Some(path) = self.files.get(self.cursor).cloned() else {
            return Ok(None);
        };
        self.cursor += 1;
        self.pacer.wait().await;

        let sequence = self.sequence;
        self.sequence += 1;
        let captured_at = self
            .clock
            .map(|clock| clock.timestamp(sequence))
            .unwrap_or_else(Utc::now);

        let decoded = tokio::task::spawn_blocking(move || image::open(&path).map(|img| (path, img.to_luma8())))
            .await
            .map_err(|e| VisionError::Camera(format!("Frame decode task failed: {}", e)))?;

        match decoded {
            Ok((path, luma)) => {
                debug!("Replayed frame {} from {:?}", sequence, path);
                let (width, height) = luma.dimensions();
                Ok(Some(Frame::new(
                    sequence,
                    width,
                    height,
                    PixelFormat::Gray8,
                    luma.into_raw(),
                    captured_at,
                )))
            }
            Err(e) => {
                warn!("Skipping unreadable replay frame {}: {}", sequence, e);
                Err(VisionError::Image(e))
            }
        }
    }

    async fn close(&mut self) -> Result<(), VisionError> {
        if self.open {
            info!("Replay source closed after {} frames", self.sequence);
        }
        self.open = false;
        self.files.clear();
        self.cursor = 0;
        Ok(())
    }
}
