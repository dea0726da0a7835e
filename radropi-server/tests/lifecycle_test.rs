//! Startup ordering, rollback and fault absorption of the orchestrator

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use radropi_core::{Category, Classification, Frame, PixelFormat};
use radropi_eye::{
    ClassificationRequest, Classifier, FixedClassifier, FrameSource, Pacing, SyntheticFrameSource,
    SyntheticObject, SyntheticScene, VisionError,
};
use radropi_gps::MockPositionService;
use radropi_server::{Components, Orchestrator, OrchestratorError, PipelineEvent, SystemConfig};
use radropi_servo::MockActuator;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct BrokenModel;

#[async_trait]
impl Classifier for BrokenModel {
    fn name(&self) -> &str {
        "broken"
    }

    async fn load(&self) -> Result<(), VisionError> {
        Err(VisionError::Model("weights missing".to_string()))
    }

    async fn classify(&self, _request: &ClassificationRequest) -> Result<Classification, VisionError> {
        Ok(Classification::fallback())
    }
}

/// Yields `good` blank frames, then fails with `error` on every call
struct FailingSource {
    good: u64,
    sent: u64,
    error: fn() -> VisionError,
}

#[async_trait]
impl FrameSource for FailingSource {
    fn name(&self) -> &str {
        "failing"
    }

    async fn open(&mut self) -> Result<(), VisionError> {
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, VisionError> {
        if self.sent == self.good {
            return Err((self.error)());
        }
        self.sent += 1;
        Ok(Some(Frame::new(self.sent, 32, 16, PixelFormat::Gray8, vec![10u8; 32 * 16], Utc::now())))
    }

    async fn close(&mut self) -> Result<(), VisionError> {
        Ok(())
    }
}

fn config(dir: &TempDir) -> SystemConfig {
    let mut config = SystemConfig::default();
    config.logger.log_dir = dir.path().to_path_buf();
    config.logger.retention_days = 0;
    config.pipeline.frame_queue_depth = 64;
    config
}

fn scene(frames: u64) -> SyntheticScene {
    SyntheticScene {
        noise_amplitude: 0,
        ..SyntheticScene::empty(128, 64, frames)
    }
    .with_object(SyntheticObject {
        start: (20.0, 20.0),
        end: (60.0, 20.0),
        size: 4,
        brightness: 230,
        first_frame: 1,
        last_frame: frames.saturating_sub(1),
    })
}

fn source(scene: SyntheticScene) -> SyntheticFrameSource {
    let start = Utc.with_ymd_and_hms(2024, 8, 12, 22, 0, 0).unwrap();
    SyntheticFrameSource::new(scene, Duration::from_millis(100), Pacing::Immediate).with_start_time(start)
}

#[tokio::test]
async fn servo_failure_unwinds_started_components() {
    let dir = TempDir::new().unwrap();
    let actuator = MockActuator::new();
    let servos = actuator.handle();
    servos.set_connect_fails(true);
    let gps = Arc::new(MockPositionService::fixed(40.0, -74.0, None));

    let components = Components {
        frame_source: Box::new(source(scene(10))),
        classifier: Arc::new(FixedClassifier::new(Category::Meteor, 0.9)),
        actuator: Box::new(actuator),
        position: gps.clone(),
    };
    let mut orchestrator = Orchestrator::new(config(&dir)).unwrap();
    let err = orchestrator.start(components).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Startup { component: "servos", .. }));
    assert!(!orchestrator.is_running());
    assert!(!gps.is_started());
    // the logger comes after the servos and never created its directories
    assert!(!dir.path().join("detections").exists());
}

#[tokio::test]
async fn classifier_failure_releases_servos() {
    let dir = TempDir::new().unwrap();
    let actuator = MockActuator::new();
    let servos = actuator.handle();
    let gps = Arc::new(MockPositionService::fixed(40.0, -74.0, None));

    let components = Components {
        frame_source: Box::new(source(scene(10))),
        classifier: Arc::new(BrokenModel),
        actuator: Box::new(actuator),
        position: gps.clone(),
    };
    let mut orchestrator = Orchestrator::new(config(&dir)).unwrap();
    let err = orchestrator.start(components).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Startup { component: "classifier", .. }));
    assert!(err.to_string().contains("weights missing"));
    assert!(!servos.is_connected());
    assert!(!gps.is_started());
}

#[tokio::test]
async fn shutdown_without_start_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut orchestrator = Orchestrator::new(config(&dir)).unwrap();
    assert!(matches!(orchestrator.shutdown().await, Err(OrchestratorError::NotRunning)));
}

#[tokio::test]
async fn invalid_config_rejected_before_anything_starts() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.pipeline.frame_queue_depth = 0;
    assert!(matches!(Orchestrator::new(config), Err(OrchestratorError::Config(_))));
}

#[tokio::test]
async fn dropouts_and_corrupt_frames_are_absorbed() {
    let dir = TempDir::new().unwrap();
    let mut scene = scene(20);
    scene.dropped_frames = vec![4, 5];
    scene.corrupt_frames = vec![8];
    let gps = Arc::new(MockPositionService::fixed(40.0, -74.0, None));

    let components = Components {
        frame_source: Box::new(source(scene)),
        classifier: Arc::new(FixedClassifier::new(Category::Meteor, 0.9)),
        actuator: Box::new(MockActuator::new()),
        position: gps.clone(),
    };
    let mut orchestrator = Orchestrator::new(config(&dir)).unwrap();
    let mut events = orchestrator.subscribe();
    orchestrator.start(components).await.unwrap();
    orchestrator.wait_for_completion().await;
    let report = orchestrator.shutdown().await.unwrap();

    assert_eq!(report.stats.frames_acquired, 18);
    assert_eq!(report.stats.acquisition_errors, 2);
    assert_eq!(report.stats.frame_errors, 1);
    assert_eq!(report.stats.cycles, 18);
    assert!(!gps.is_started());

    let mut finished = false;
    while let Ok(event) = events.try_recv() {
        if event == PipelineEvent::Finished {
            finished = true;
        }
    }
    assert!(finished);
}

async fn run_failing(dir: &TempDir, error: fn() -> VisionError) -> radropi_server::RunReport {
    let mut config = config(dir);
    config.vision.camera.max_consecutive_errors = 4;
    let components = Components {
        frame_source: Box::new(FailingSource { good: 3, sent: 0, error }),
        classifier: Arc::new(FixedClassifier::new(Category::Meteor, 0.9)),
        actuator: Box::new(MockActuator::new()),
        position: Arc::new(MockPositionService::no_fix()),
    };
    let mut orchestrator = Orchestrator::new(config).unwrap();
    orchestrator.start(components).await.unwrap();
    orchestrator.wait_for_completion().await;
    orchestrator.shutdown().await.unwrap()
}

#[tokio::test]
async fn non_transient_source_error_ends_the_stream() {
    let dir = TempDir::new().unwrap();
    let report = run_failing(&dir, || VisionError::Config("camera unplugged".to_string())).await;
    assert_eq!(report.stats.frames_acquired, 3);
    assert_eq!(report.stats.acquisition_errors, 1);
}

#[tokio::test]
async fn transient_source_errors_end_the_stream_past_the_limit() {
    let dir = TempDir::new().unwrap();
    let report = run_failing(&dir, || VisionError::Camera("dropout".to_string())).await;
    assert_eq!(report.stats.frames_acquired, 3);
    // the limit is exceeded on the fifth error in a row
    assert_eq!(report.stats.acquisition_errors, 5);
}

#[tokio::test]
async fn signal_stops_a_real_time_run() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.pipeline.shutdown_grace_ms = 500;
    let scene = scene(10_000);
    let components = Components {
        frame_source: Box::new(SyntheticFrameSource::new(
            scene,
            Duration::from_millis(10),
            Pacing::RealTime,
        )),
        classifier: Arc::new(FixedClassifier::new(Category::Asteroid, 0.8)),
        actuator: Box::new(MockActuator::new()),
        position: Arc::new(MockPositionService::no_fix()),
    };
    let mut orchestrator = Orchestrator::new(config).unwrap();
    let report = orchestrator
        .run_until(components, tokio::time::sleep(Duration::from_millis(300)))
        .await
        .unwrap();

    assert!(report.stats.frames_acquired > 0);
    assert!(report.stats.frames_acquired < 10_000);
    assert!(report.session.is_some());
    assert!(!orchestrator.is_running());
}
