//! Sensor and actuator selection

use crate::config::{ClassifierChoice, SystemConfig};
use crate::error::OrchestratorError;
use radropi_eye::{
    CameraConfig, Classifier, FixedClassifier, FrameSource, HeuristicClassifier,
    ReplayFrameSource, SyntheticFrameSource,
};
use radropi_gps::{MockPositionService, PositionService};
use radropi_servo::{Actuator, MockActuator};
use std::sync::Arc;
use tracing::info;

/// Concrete implementations behind each sensor seam, chosen once at startup
pub struct Components {
    pub frame_source: Box<dyn FrameSource>,
    pub classifier: Arc<dyn Classifier>,
    pub actuator: Box<dyn Actuator>,
    pub position: Arc<dyn PositionService>,
}

impl Components {
    /// Build from configuration: live capture reads the camera, a replay
    /// directory selects recorded frames, otherwise the synthetic scene plays;
    /// a missing serial port selects the mock actuator or position service
    pub fn from_config(config: &SystemConfig) -> Result<Self, OrchestratorError> {
        let camera = &config.vision.camera;
        let frame_source: Box<dyn FrameSource> = if camera.live_capture {
            build_capture(camera)?
        } else if let Some(dir) = &camera.replay_dir {
            Box::new(ReplayFrameSource::new(dir.clone(), camera))
        } else {
            Box::new(SyntheticFrameSource::new(
                config.synthetic.clone(),
                camera.frame_interval(),
                camera.pacing,
            ))
        };

        let classifier: Arc<dyn Classifier> = match &config.pipeline.classifier {
            ClassifierChoice::Heuristic => Arc::new(HeuristicClassifier::new()),
            ClassifierChoice::Fixed { category, confidence } => {
                Arc::new(FixedClassifier::new(*category, *confidence))
            }
        };

        let components = Self {
            frame_source,
            classifier,
            actuator: build_actuator(config)?,
            position: build_position_service(config)?,
        };
        info!(
            "Components selected: frames={}, classifier={}, actuator={}, position={}",
            components.frame_source.name(),
            components.classifier.name(),
            components.actuator.name(),
            components.position.name()
        );
        Ok(components)
    }
}

#[cfg(feature = "capture")]
fn build_capture(camera: &CameraConfig) -> Result<Box<dyn FrameSource>, OrchestratorError> {
    Ok(Box::new(radropi_eye::CaptureFrameSource::new(camera)))
}

#[cfg(not(feature = "capture"))]
fn build_capture(camera: &CameraConfig) -> Result<Box<dyn FrameSource>, OrchestratorError> {
    Err(OrchestratorError::Config(format!(
        "Live capture from camera {} requested but capture support is not compiled in",
        camera.camera_id
    )))
}

#[cfg(feature = "serial")]
fn build_actuator(config: &SystemConfig) -> Result<Box<dyn Actuator>, OrchestratorError> {
    Ok(match &config.servo.serial_port {
        Some(port) => Box::new(radropi_servo::SerialActuator::new(
            port.clone(),
            config.servo.baud_rate,
            config.servo.command_timeout(),
        )),
        None => Box::new(MockActuator::new()),
    })
}

#[cfg(not(feature = "serial"))]
fn build_actuator(config: &SystemConfig) -> Result<Box<dyn Actuator>, OrchestratorError> {
    match &config.servo.serial_port {
        Some(port) => Err(OrchestratorError::Config(format!(
            "Servo port {} configured but serial support is not compiled in",
            port
        ))),
        None => Ok(Box::new(MockActuator::new())),
    }
}

#[cfg(feature = "serial")]
fn build_position_service(config: &SystemConfig) -> Result<Arc<dyn PositionService>, OrchestratorError> {
    Ok(match &config.gps.port {
        Some(port) => Arc::new(
            radropi_gps::NmeaReceiver::open_serial(port, &config.gps)
                .map_err(|e| OrchestratorError::startup("position service", e))?,
        ),
        None => Arc::new(MockPositionService::from_config(&config.gps)),
    })
}

#[cfg(not(feature = "serial"))]
fn build_position_service(config: &SystemConfig) -> Result<Arc<dyn PositionService>, OrchestratorError> {
    match &config.gps.port {
        Some(port) => Err(OrchestratorError::Config(format!(
            "GPS port {} configured but serial support is not compiled in",
            port
        ))),
        None => Ok(Arc::new(MockPositionService::from_config(&config.gps))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_select_mocks() {
        let components = Components::from_config(&SystemConfig::default()).unwrap();
        assert_eq!(components.frame_source.name(), "synthetic");
        assert_eq!(components.classifier.name(), "heuristic");
        assert_eq!(components.actuator.name(), "mock");
        assert_eq!(components.position.name(), "mock");
    }

    #[test]
    fn test_replay_dir_selects_replay() {
        let mut config = SystemConfig::default();
        config.vision.camera.replay_dir = Some("frames".into());
        let components = Components::from_config(&config).unwrap();
        assert_eq!(components.frame_source.name(), "replay");
    }

    #[cfg(not(feature = "capture"))]
    #[test]
    fn test_live_capture_without_support_is_config_error() {
        let mut config = SystemConfig::default();
        config.vision.camera.live_capture = true;
        assert!(matches!(
            Components::from_config(&config),
            Err(OrchestratorError::Config(_))
        ));
    }

    #[cfg(feature = "capture")]
    #[test]
    fn test_live_capture_selects_camera() {
        let mut config = SystemConfig::default();
        config.vision.camera.live_capture = true;
        config.vision.camera.camera_id = 1;
        let components = Components::from_config(&config).unwrap();
        assert_eq!(components.frame_source.name(), "camera");
    }

    #[cfg(not(feature = "serial"))]
    #[test]
    fn test_serial_port_without_support_is_config_error() {
        let mut config = SystemConfig::default();
        config.servo.serial_port = Some("/dev/ttyUSB0".to_string());
        assert!(matches!(
            Components::from_config(&config),
            Err(OrchestratorError::Config(_))
        ));
    }
}
