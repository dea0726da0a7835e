//! Configuration for radropi-eye

use crate::camera::Pacing;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Vision system configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub camera: CameraConfig,
    pub motion: MotionConfig,
    pub classifier: ClassifierConfig,
    pub tracking: TrackingConfig,
}

/// Frame acquisition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera device index (0, 1, 2, etc.)
    pub camera_id: u32,
    /// Target frame rate (frames per second)
    pub frame_rate: u32,
    /// Camera resolution (width, height)
    pub resolution: (u32, u32),
    /// Read frames from camera `camera_id` (needs the `capture` feature)
    pub live_capture: bool,
    /// Exposure passed to the camera driver; negative values select auto exposure
    pub exposure: Option<f64>,
    /// Sensor gain, 0-100
    pub gain: Option<f64>,
    /// Directory of recorded frames to replay instead of live capture
    pub replay_dir: Option<PathBuf>,
    /// Whether sources wait out the frame interval between frames
    pub pacing: Pacing,
    /// Consecutive read failures tolerated before the stream is declared lost
    pub max_consecutive_errors: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            camera_id: 0,
            frame_rate: 10,
            resolution: (640, 480),
            live_capture: false,
            exposure: None,
            gain: None,
            replay_dir: None,
            pacing: Pacing::RealTime,
            max_consecutive_errors: 10,
        }
    }
}

/// Background subtraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// EMA weight of the current frame in the background model
    pub background_alpha: f32,
    /// EMA weight of the current frame in the noise estimate
    pub noise_alpha: f32,
    /// Threshold as a multiple of the noise estimate
    pub noise_multiplier: f32,
    /// Floor for the adaptive threshold, in luma levels
    pub min_threshold: f32,
    /// Smallest component kept, in pixels
    pub min_area: u32,
    /// Largest component kept, in pixels
    pub max_area: u32,
    /// 3x3 box blur before differencing
    pub denoise: bool,
    /// Apply a fixed gain to dark frames before differencing
    pub low_light_enhancement: bool,
    /// Mean luma under which a frame counts as low-light
    pub low_light_level: f32,
    pub low_light_gain: f32,
    /// Foreground share of the frame that is treated as a global lighting change
    pub reseed_foreground_fraction: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            background_alpha: 0.05,
            noise_alpha: 0.05,
            noise_multiplier: 4.0,
            min_threshold: 12.0,
            min_area: 4,
            max_area: 5000,
            denoise: true,
            low_light_enhancement: false,
            low_light_level: 30.0,
            low_light_gain: 2.0,
            reseed_foreground_fraction: 0.5,
        }
    }
}

/// Classifier capability contract
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Latency budget per region; exceeded calls fall back to non-meteor @ 0
    pub timeout_ms: u64,
    /// Regions classified concurrently within one cycle
    pub max_concurrent: usize,
    /// Extra pixels around the region when cropping
    pub crop_padding: u32,
    /// Upper bound on regions classified per cycle, brightest first
    pub max_regions_per_frame: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 200,
            max_concurrent: 8,
            crop_padding: 2,
            max_regions_per_frame: 32,
        }
    }
}

/// Track association and lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Base association gate around the predicted center, in pixels
    pub gate_radius: f32,
    /// Gate growth per pixel of predicted travel
    pub gate_velocity_factor: f32,
    /// EMA weight of the newest velocity measurement
    pub velocity_alpha: f32,
    /// Consecutive matches (creation included) before a track is confirmed
    pub confirm_hits: u32,
    /// Unmatched cycles tolerated before a track goes stale
    pub max_age: u32,
    /// Classifications kept for the majority vote
    pub history_len: usize,
    /// Stale tracks are compacted out every this many updates
    pub compact_every: u32,
    /// Hard cap on the live track set
    pub max_tracks: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            gate_radius: 40.0,
            gate_velocity_factor: 0.5,
            velocity_alpha: 0.5,
            confirm_hits: 3,
            max_age: 5,
            history_len: 5,
            compact_every: 32,
            max_tracks: 256,
        }
    }
}

impl VisionConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.camera.validate()?;
        self.motion.validate()?;
        self.classifier.validate()?;
        self.tracking.validate()
    }
}

impl CameraConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.frame_rate == 0 || self.frame_rate > 120 {
            return Err("Frame rate must be between 1 and 120".to_string());
        }

        if self.resolution.0 == 0 || self.resolution.1 == 0 {
            return Err("Resolution must be non-zero".to_string());
        }

        if self.resolution.0 > 7680 || self.resolution.1 > 4320 {
            return Err("Resolution too large (max 8K)".to_string());
        }

        if self.camera_id > 100 {
            return Err("Camera ID too large (max 100)".to_string());
        }

        if self.live_capture && self.replay_dir.is_some() {
            return Err("live_capture and replay_dir are mutually exclusive".to_string());
        }

        if let Some(gain) = self.gain {
            if !(0.0..=100.0).contains(&gain) {
                return Err("gain must be between 0 and 100".to_string());
            }
        }

        if self.exposure.map_or(false, |e| !e.is_finite()) {
            return Err("exposure must be finite".to_string());
        }

        Ok(())
    }

    /// Time between frames at the configured rate
    pub fn frame_interval(&self) -> std::time::Duration {
        let rate = self.frame_rate.max(1);
        std::time::Duration::from_secs_f64(1.0 / rate as f64)
    }
}

impl MotionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.background_alpha > 0.0 && self.background_alpha <= 1.0) {
            return Err("background_alpha must be in (0, 1]".to_string());
        }
        if !(self.noise_alpha > 0.0 && self.noise_alpha <= 1.0) {
            return Err("noise_alpha must be in (0, 1]".to_string());
        }
        if !(self.min_threshold > 0.0) || !(self.noise_multiplier >= 0.0) {
            return Err("Motion threshold parameters must be positive".to_string());
        }
        if self.min_area == 0 || self.min_area > self.max_area {
            return Err("min_area must be non-zero and not exceed max_area".to_string());
        }
        if !(self.low_light_gain >= 1.0) {
            return Err("low_light_gain must be at least 1.0".to_string());
        }
        if !(self.reseed_foreground_fraction > 0.0 && self.reseed_foreground_fraction <= 1.0) {
            return Err("reseed_foreground_fraction must be in (0, 1]".to_string());
        }
        Ok(())
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_ms == 0 {
            return Err("Classifier timeout must be non-zero".to_string());
        }
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be at least 1".to_string());
        }
        if self.max_regions_per_frame == 0 {
            return Err("max_regions_per_frame must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

impl TrackingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.gate_radius > 0.0) || !(self.gate_velocity_factor >= 0.0) {
            return Err("Association gate must be positive".to_string());
        }
        if !(self.velocity_alpha > 0.0 && self.velocity_alpha <= 1.0) {
            return Err("velocity_alpha must be in (0, 1]".to_string());
        }
        if self.confirm_hits == 0 {
            return Err("confirm_hits must be at least 1".to_string());
        }
        if self.history_len == 0 {
            return Err("history_len must be at least 1".to_string());
        }
        if self.compact_every == 0 || self.max_tracks == 0 {
            return Err("compact_every and max_tracks must be non-zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_is_valid() {
        let config = VisionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.camera.frame_rate, 10);
        assert_eq!(config.tracking.confirm_hits, 3);
    }

    #[test]
    fn test_config_validation_frame_rate() {
        let mut config = VisionConfig::default();
        config.camera.frame_rate = 0;
        assert!(config.validate().is_err());
        config.camera.frame_rate = 121;
        assert!(config.validate().is_err());
        config.camera.frame_rate = 120;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_resolution() {
        let mut config = VisionConfig::default();
        config.camera.resolution = (0, 480);
        assert!(config.validate().is_err());
        config.camera.resolution = (7681, 4320);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_capture() {
        let mut config = VisionConfig::default();
        config.camera.live_capture = true;
        config.camera.gain = Some(50.0);
        config.camera.exposure = Some(-6.0);
        assert!(config.validate().is_ok());

        config.camera.replay_dir = Some(PathBuf::from("frames"));
        assert!(config.validate().is_err());

        config.camera.replay_dir = None;
        config.camera.gain = Some(120.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_motion() {
        let mut config = VisionConfig::default();
        config.motion.min_area = 0;
        assert!(config.validate().is_err());

        let mut config = VisionConfig::default();
        config.motion.background_alpha = 1.5;
        assert!(config.validate().is_err());

        let mut config = VisionConfig::default();
        config.motion.min_threshold = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_tracking() {
        let mut config = VisionConfig::default();
        config.tracking.confirm_hits = 0;
        assert!(config.validate().is_err());

        let mut config = VisionConfig::default();
        config.tracking.history_len = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: VisionConfig =
            serde_json::from_str(r#"{"tracking": {"max_age": 9}}"#).unwrap();
        assert_eq!(config.tracking.max_age, 9);
        assert_eq!(config.tracking.confirm_hits, 3);
        assert_eq!(config.classifier.timeout_ms, 200);
    }

    #[test]
    fn test_frame_interval() {
        let config = CameraConfig::default();
        assert_eq!(config.frame_interval(), std::time::Duration::from_millis(100));
    }
}
