//! System configuration: every crate's section plus pipeline policy

use crate::error::OrchestratorError;
use radropi_core::Category;
use radropi_eye::{SyntheticObject, SyntheticScene, VisionConfig};
use radropi_gps::GpsConfig;
use radropi_logger::LoggerConfig;
use radropi_servo::ServoConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which classifier backs the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierChoice {
    /// Brightness/area/elongation rules
    Heuristic,
    /// Constant answer, for bench tests and deployments without a model
    Fixed { category: Category, confidence: f32 },
}

impl Default for ClassifierChoice {
    fn default() -> Self {
        ClassifierChoice::Heuristic
    }
}

/// Queueing, shutdown and logging policy of the perception loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frames buffered between acquisition and processing; the oldest is
    /// dropped when full
    pub frame_queue_depth: usize,
    /// Time allowed for in-flight frames to drain on shutdown
    pub shutdown_grace_ms: u64,
    /// Log again when a logged track's category changes
    pub log_category_changes: bool,
    /// Also log confirmed non-meteor tracks
    pub log_non_meteor: bool,
    pub classifier: ClassifierChoice,
    /// Capacity of the pipeline event broadcast
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_queue_depth: 4,
            shutdown_grace_ms: 2_000,
            log_category_changes: true,
            log_non_meteor: false,
            classifier: ClassifierChoice::default(),
            event_capacity: 256,
        }
    }
}

impl PipelineConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.frame_queue_depth == 0 {
            return Err("frame_queue_depth must be at least 1".to_string());
        }
        if self.event_capacity == 0 {
            return Err("event_capacity must be at least 1".to_string());
        }
        if let ClassifierChoice::Fixed { confidence, .. } = self.classifier {
            if !(0.0..=1.0).contains(&confidence) {
                return Err("Fixed classifier confidence must be within [0, 1]".to_string());
            }
        }
        Ok(())
    }
}

/// Complete configuration of a radropi deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub vision: VisionConfig,
    pub servo: ServoConfig,
    pub gps: GpsConfig,
    pub logger: LoggerConfig,
    pub pipeline: PipelineConfig,
    /// Scene played when no replay directory is configured
    pub synthetic: SyntheticScene,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let synthetic = SyntheticScene {
            frame_count: 300,
            ..SyntheticScene::default()
        }
        .with_object(SyntheticObject {
            start: (20.0, 40.0),
            end: (260.0, 120.0),
            size: 4,
            brightness: 230,
            first_frame: 30,
            last_frame: 90,
        });
        Self {
            vision: VisionConfig::default(),
            servo: ServoConfig::default(),
            gps: GpsConfig::default(),
            logger: LoggerConfig::default(),
            pipeline: PipelineConfig::default(),
            synthetic,
        }
    }
}

impl SystemConfig {
    /// Load configuration from a JSON, TOML or YAML file
    pub fn from_file(path: &Path) -> Result<Self, OrchestratorError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| OrchestratorError::Config(format!("Invalid JSON config: {}", e))),
            Some("toml") => toml::from_str(&content)
                .map_err(|e| OrchestratorError::Config(format!("Invalid TOML config: {}", e))),
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| OrchestratorError::Config(format!("Invalid YAML config: {}", e))),
            _ => Self::from_str(&content),
        }
    }

    /// Parse configuration text, trying JSON, then TOML, then YAML
    pub fn from_str(content: &str) -> Result<Self, OrchestratorError> {
        if let Ok(config) = serde_json::from_str::<SystemConfig>(content) {
            return Ok(config);
        }
        if let Ok(config) = toml::from_str::<SystemConfig>(content) {
            return Ok(config);
        }
        if let Ok(config) = serde_yaml::from_str::<SystemConfig>(content) {
            return Ok(config);
        }
        Err(OrchestratorError::Config("Unknown configuration format".to_string()))
    }

    /// Defaults with `RADROPI_*` environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply `RADROPI_*` overrides read through `lookup`. Unparseable values
    /// are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("RADROPI_LOG_DIR") {
            self.logger.log_dir = PathBuf::from(dir);
        }
        if let Some(rate) = lookup("RADROPI_FRAME_RATE").and_then(|v| v.parse().ok()) {
            self.vision.camera.frame_rate = rate;
        }
        if let Some(id) = lookup("RADROPI_CAMERA_ID").and_then(|v| v.parse().ok()) {
            self.vision.camera.camera_id = id;
            self.vision.camera.live_capture = true;
        }
        if let Some(dir) = lookup("RADROPI_REPLAY_DIR") {
            self.vision.camera.replay_dir = Some(PathBuf::from(dir));
        }
        if let Some(port) = lookup("RADROPI_SERVO_PORT") {
            self.servo.serial_port = Some(port);
        }
        if let Some(port) = lookup("RADROPI_GPS_PORT") {
            self.gps.port = Some(port);
        }
        if let Some(ms) = lookup("RADROPI_CLASSIFIER_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.vision.classifier.timeout_ms = ms;
        }
        if let Some(ms) = lookup("RADROPI_IDLE_PERIOD_MS").and_then(|v| v.parse().ok()) {
            self.servo.idle_period_ms = ms;
        }
    }

    /// Drop hardware ports so the mock actuator and position service are used
    pub fn use_mock_hardware(&mut self) {
        self.servo.serial_port = None;
        self.gps.port = None;
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let sections: [(&str, Result<(), String>); 5] = [
            ("vision", self.vision.validate()),
            ("servo", self.servo.validate()),
            ("gps", self.gps.validate()),
            ("logger", self.logger.validate()),
            ("pipeline", self.pipeline.validate()),
        ];
        for (name, result) in sections {
            result.map_err(|e| OrchestratorError::Config(format!("{}: {}", name, e)))?;
        }
        if self.vision.camera.replay_dir.is_none()
            && (self.synthetic.width < 3 || self.synthetic.height < 3)
        {
            return Err(OrchestratorError::Config(
                "synthetic: scene must be at least 3x3".to_string(),
            ));
        }
        Ok(())
    }
}
