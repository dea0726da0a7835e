//! Deterministic synthetic sky for tests and hardware-free runs

use crate::camera::{FrameClock, FramePacer, FrameSource, Pacing};
use crate::error::VisionError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use radropi_core::{Frame, PixelFormat};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Bright square moving linearly across the sky
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticObject {
    /// Top-left corner at `first_frame`
    pub start: (f32, f32),
    /// Top-left corner at `last_frame`
    pub end: (f32, f32),
    /// Side length in pixels
    pub size: u32,
    pub brightness: u8,
    pub first_frame: u64,
    pub last_frame: u64,
}

impl SyntheticObject {
    /// Top-left corner at `sequence`, `None` while the object is not in view
    pub fn position(&self, sequence: u64) -> Option<(f32, f32)> {
        if sequence < self.first_frame || sequence > self.last_frame {
            return None;
        }
        let span = self.last_frame - self.first_frame;
        let t = if span == 0 {
            0.0
        } else {
            (sequence - self.first_frame) as f32 / span as f32
        };
        Some((
            self.start.0 + (self.end.0 - self.start.0) * t,
            self.start.1 + (self.end.1 - self.start.1) * t,
        ))
    }
}

/// Scripted scene description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticScene {
    pub width: u32,
    pub height: u32,
    /// Sky background level
    pub background: u8,
    /// Uniform noise amplitude added to each pixel (0 disables noise)
    pub noise_amplitude: u8,
    pub seed: u64,
    pub frame_count: u64,
    pub objects: Vec<SyntheticObject>,
    /// Sequences delivered with a truncated buffer
    pub corrupt_frames: Vec<u64>,
    /// Sequences that fail acquisition, simulating camera dropout
    pub dropped_frames: Vec<u64>,
}

impl Default for SyntheticScene {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            background: 20,
            noise_amplitude: 2,
            seed: 42,
            frame_count: 100,
            objects: Vec::new(),
            corrupt_frames: Vec::new(),
            dropped_frames: Vec::new(),
        }
    }
}

impl SyntheticScene {
    /// Empty sky of the given size
    pub fn empty(width: u32, height: u32, frame_count: u64) -> Self {
        Self {
            width,
            height,
            frame_count,
            ..Self::default()
        }
    }

    pub fn with_object(mut self, object: SyntheticObject) -> Self {
        self.objects.push(object);
        self
    }

    /// Render frame `sequence` deterministically
    pub fn render(&self, sequence: u64, rng: &mut StdRng) -> Vec<u8> {
        let width = self.width as usize;
        let mut data = vec![self.background; width * self.height as usize];

        if self.noise_amplitude > 0 {
            let amp = self.noise_amplitude as i16;
            for px in data.iter_mut() {
                let jitter: i16 = rng.gen_range(-amp..=amp);
                *px = (*px as i16 + jitter).clamp(0, 255) as u8;
            }
        }

        for object in &self.objects {
            let Some((ox, oy)) = object.position(sequence) else {
                continue;
            };
            let x0 = ox.round().max(0.0) as u32;
            let y0 = oy.round().max(0.0) as u32;
            let x1 = (ox.round() + object.size as f32).max(0.0) as u32;
            let y1 = (oy.round() + object.size as f32).max(0.0) as u32;
            for y in y0..y1.min(self.height) {
                for x in x0..x1.min(self.width) {
                    data[y as usize * width + x as usize] = object.brightness;
                }
            }
        }
        data
    }
}

/// Frame source backed by a [`SyntheticScene`]
pub struct SyntheticFrameSource {
    scene: SyntheticScene,
    rng: StdRng,
    sequence: u64,
    pacer: FramePacer,
    interval: Duration,
    clock: Option<FrameClock>,
    start_time: Option<DateTime<Utc>>,
    open: bool,
}

impl SyntheticFrameSource {
    pub fn new(scene: SyntheticScene, interval: Duration, pacing: Pacing) -> Self {
        let rng = StdRng::seed_from_u64(scene.seed);
        Self {
            scene,
            rng,
            sequence: 0,
            pacer: FramePacer::new(interval, pacing),
            interval,
            clock: None,
            start_time: None,
            open: false,
        }
    }

    /// Pin the timestamp of frame 0 so runs are reproducible
    pub fn with_start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    pub fn scene(&self) -> &SyntheticScene {
        &self.scene
    }
}

#[async_trait]
impl FrameSource for SyntheticFrameSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn open(&mut self) -> Result<(), VisionError> {
        if self.scene.width == 0 || self.scene.height == 0 {
            return Err(VisionError::Camera("Synthetic scene has zero size".to_string()));
        }
        let start = self.start_time.unwrap_or_else(Utc::now);
        self.clock = Some(FrameClock::new(start, self.interval));
        self.rng = StdRng::seed_from_u64(self.scene.seed);
        self.sequence = 0;
        self.pacer.reset();
        self.open = true;
        info!(
            "Synthetic source opened: {}x{}, {} frames, {} objects",
            self.scene.width,
            self.scene.height,
            self.scene.frame_count,
            self.scene.objects.len()
        );
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, VisionError> {
        if !self.open {
            return Err(VisionError::Camera("Synthetic source is not open".to_string()));
        }
        if self.sequence >= self.scene.frame_count {
            return Ok(None);
        }
        self.pacer.wait().await;

        let sequence = self.sequence;
        self.sequence += 1;
        // always render so the noise stream does not depend on dropouts
        let mut data = self.scene.render(sequence, &mut self.rng);

        if self.scene.dropped_frames.contains(&sequence) {
            debug!("Synthetic dropout at frame {}", sequence);
            return Err(VisionError::Camera(format!("Simulated dropout at frame {}", sequence)));
        }
        if self.scene.corrupt_frames.contains(&sequence) {
            data.truncate(data.len() / 2);
        }

        let captured_at = self
            .clock
            .map(|clock| clock.timestamp(sequence))
            .unwrap_or_else(Utc::now);
        Ok(Some(Frame::new(
            sequence,
            self.scene.width,
            self.scene.height,
            PixelFormat::Gray8,
            data,
            captured_at,
        )))
    }

    async fn close(&mut self) -> Result<(), VisionError> {
        self.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mover() -> SyntheticObject {
        SyntheticObject {
            start: (10.0, 10.0),
            end: (100.0, 10.0),
            size: 5,
            brightness: 250,
            first_frame: 0,
            last_frame: 9,
        }
    }

    #[test]
    fn test_object_interpolation() {
        let object = mover();
        assert_eq!(object.position(0), Some((10.0, 10.0)));
        assert_eq!(object.position(9), Some((100.0, 10.0)));
        let (x, y) = object.position(3).unwrap();
        assert!((x - 40.0).abs() < 1e-3 && y == 10.0);
        assert_eq!(object.position(10), None);
    }

    #[tokio::test]
    async fn test_same_seed_same_frames() {
        let scene = SyntheticScene::empty(32, 16, 3).with_object(mover());
        let mut a = SyntheticFrameSource::new(scene.clone(), Duration::from_millis(100), Pacing::Immediate);
        let mut b = SyntheticFrameSource::new(scene, Duration::from_millis(100), Pacing::Immediate);
        a.open().await.unwrap();
        b.open().await.unwrap();
        for _ in 0..3 {
            let fa = a.next_frame().await.unwrap().unwrap();
            let fb = b.next_frame().await.unwrap().unwrap();
            assert_eq!(fa.data, fb.data);
        }
        assert!(a.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_object_rendered_at_position() {
        let scene = SyntheticScene {
            noise_amplitude: 0,
            ..SyntheticScene::empty(128, 32, 10)
        }
        .with_object(mover());
        let mut source = SyntheticFrameSource::new(scene, Duration::from_millis(100), Pacing::Immediate);
        source.open().await.unwrap();
        let frame = source.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.luma(12, 12), Some(250));
        assert_eq!(frame.luma(30, 12), Some(20));
    }

    #[tokio::test]
    async fn test_timestamps_follow_interval() {
        let start = Utc::now();
        let mut source = SyntheticFrameSource::new(
            SyntheticScene::empty(8, 8, 3),
            Duration::from_millis(100),
            Pacing::Immediate,
        )
        .with_start_time(start);
        source.open().await.unwrap();
        let f0 = source.next_frame().await.unwrap().unwrap();
        let f1 = source.next_frame().await.unwrap().unwrap();
        assert_eq!(f0.captured_at, start);
        assert_eq!(f1.captured_at - f0.captured_at, chrono::Duration::milliseconds(100));
    }

    #[tokio::test]
    async fn test_dropout_and_corruption() {
        let scene = SyntheticScene {
            dropped_frames: vec![1],
            corrupt_frames: vec![2],
            ..SyntheticScene::empty(8, 8, 3)
        };
        let mut source = SyntheticFrameSource::new(scene, Duration::from_millis(100), Pacing::Immediate);
        source.open().await.unwrap();
        assert!(source.next_frame().await.unwrap().unwrap().is_well_formed());
        assert!(source.next_frame().await.is_err());
        let corrupt = source.next_frame().await.unwrap().unwrap();
        assert_eq!(corrupt.sequence, 2);
        assert!(!corrupt.is_well_formed());
    }

    #[tokio::test]
    async fn test_real_time_pacing_waits() {
        let mut source = SyntheticFrameSource::new(
            SyntheticScene::empty(8, 8, 3),
            Duration::from_millis(30),
            Pacing::RealTime,
        );
        source.open().await.unwrap();
        let started = std::time::Instant::now();
        for _ in 0..3 {
            source.next_frame().await.unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(55));
    }
}
