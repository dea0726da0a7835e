//! Lifecycle and run loop of the sky watcher

use crate::config::{PipelineConfig, SystemConfig};
use crate::error::OrchestratorError;
use crate::queue::DropOldestQueue;
use crate::sensors::Components;
use crate::stats::{PipelineStats, StatsSnapshot};
use chrono::{DateTime, Utc};
use radropi_core::{Category, Frame, LogEntry, LogReason, TrackId, TrackSnapshot, TrackState, TrackingCommand};
use radropi_eye::{
    ClassifierRunner, ClassifierStats, ClassifierStatsSnapshot, FrameSource, PerceptionPipeline,
    TrackEvent, TrackManager,
};
use radropi_gps::PositionService;
use radropi_logger::{EventLogger, SessionSummary};
use radropi_servo::{ServoController, ServoOutcome, ServoStats};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Notifications published while the pipeline runs
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Track(TrackEvent),
    Steered(TrackingCommand),
    Parked,
    Logged {
        track_id: TrackId,
        category: Category,
        confidence: f32,
        reason: LogReason,
    },
    /// Evicted from the frame queue before processing
    FrameDropped(u64),
    /// The processing task has drained its queue and stopped
    Finished,
}

/// Final accounting of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stats: StatsSnapshot,
    pub classifier: ClassifierStatsSnapshot,
    pub servo: ServoStats,
    /// `None` when the logger could not be shut down cleanly
    pub session: Option<SessionSummary>,
}

type SharedSource = Arc<Mutex<Box<dyn FrameSource>>>;

struct Running {
    frame_source: SharedSource,
    servo: Arc<Mutex<ServoController>>,
    logger: Arc<EventLogger>,
    position: Arc<dyn PositionService>,
    queue: Arc<DropOldestQueue<Frame>>,
    classifier_stats: Arc<ClassifierStats>,
    acquisition: Option<JoinHandle<()>>,
    processing: Option<JoinHandle<()>>,
}

/// Owns every collaborator and brings them up and down in dependency order.
///
/// Startup: position service, frame source, servos (homed), classifier
/// warm-up, event logger, then the acquisition and processing tasks. Any
/// failure unwinds what was already started and is returned; the tasks never
/// start. Shutdown runs in reverse.
pub struct Orchestrator {
    config: SystemConfig,
    stats: Arc<PipelineStats>,
    events: broadcast::Sender<PipelineEvent>,
    shutdown_tx: watch::Sender<bool>,
    running: Option<Running>,
}

impl Orchestrator {
    pub fn new(config: SystemConfig) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.pipeline.event_capacity);
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            stats: Arc::new(PipelineStats::new()),
            events,
            shutdown_tx,
            running: None,
        })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start, run until the stream ends or `signal` resolves, then shut down
    pub async fn run_until(
        &mut self,
        components: Components,
        signal: impl Future<Output = ()>,
    ) -> Result<RunReport, OrchestratorError> {
        self.start(components).await?;
        tokio::select! {
            _ = self.wait_for_completion() => info!("Frame stream finished"),
            _ = signal => info!("Shutdown requested"),
        }
        self.shutdown().await
    }

    pub async fn start(&mut self, components: Components) -> Result<(), OrchestratorError> {
        if self.running.is_some() {
            return Err(OrchestratorError::startup("orchestrator", "already running"));
        }
        let Components {
            mut frame_source,
            classifier,
            actuator,
            position,
        } = components;

        info!("Starting position service ({})", position.name());
        position
            .start()
            .await
            .map_err(|e| OrchestratorError::startup("position service", e))?;

        info!("Opening frame source ({})", frame_source.name());
        if let Err(e) = frame_source.open().await {
            unwind(None, None, &position).await;
            return Err(OrchestratorError::startup("frame source", e));
        }

        info!("Homing servos ({})", actuator.name());
        let mut servo = ServoController::new(self.config.servo.clone(), actuator);
        if let Err(e) = servo.initialize().await {
            unwind(Some(&mut servo), Some(&mut frame_source), &position).await;
            return Err(OrchestratorError::startup("servos", e));
        }

        info!("Loading classifier ({})", classifier.name());
        let runner = ClassifierRunner::new(classifier, &self.config.vision.classifier);
        if let Err(e) = runner.load().await {
            unwind(Some(&mut servo), Some(&mut frame_source), &position).await;
            return Err(OrchestratorError::startup("classifier", e));
        }

        let logger = match EventLogger::start(self.config.logger.clone()) {
            Ok(logger) => Arc::new(logger),
            Err(e) => {
                unwind(Some(&mut servo), Some(&mut frame_source), &position).await;
                return Err(OrchestratorError::startup("event logger", e));
            }
        };

        self.shutdown_tx.send_replace(false);
        let classifier_stats = runner.stats();
        let queue = Arc::new(DropOldestQueue::new(self.config.pipeline.frame_queue_depth));
        let frame_source: SharedSource = Arc::new(Mutex::new(frame_source));
        let servo = Arc::new(Mutex::new(servo));

        let acquisition = tokio::spawn(acquisition_loop(
            frame_source.clone(),
            queue.clone(),
            self.stats.clone(),
            self.events.clone(),
            self.shutdown_tx.subscribe(),
            self.config.vision.camera.max_consecutive_errors,
        ));

        let processor = Processor {
            perception: PerceptionPipeline::new(&self.config.vision, runner),
            servo: servo.clone(),
            logger: logger.clone(),
            position: position.clone(),
            stats: self.stats.clone(),
            events: self.events.clone(),
            policy: self.config.pipeline.clone(),
            save_images: self.config.logger.save_images,
            frame_interval: self.config.vision.camera.frame_interval(),
            last_capture: None,
            logged: HashMap::new(),
        };
        let processing = tokio::spawn(processor.run(queue.clone()));

        self.running = Some(Running {
            frame_source,
            servo,
            logger,
            position,
            queue,
            classifier_stats,
            acquisition: Some(acquisition),
            processing: Some(processing),
        });
        info!("Pipeline running");
        Ok(())
    }

    /// Wait until the processing task stops on its own, i.e. the frame
    /// stream ended and the queue drained. Cancel-safe.
    pub async fn wait_for_completion(&mut self) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        if let Some(handle) = running.processing.as_mut() {
            if let Err(e) = handle.await {
                error!("Processing task failed: {}", e);
            }
            running.processing = None;
        }
    }

    /// Stop acquisition, drain processing within the grace period, then
    /// flush the logger, park the servos, close the camera and stop the
    /// position service
    pub async fn shutdown(&mut self) -> Result<RunReport, OrchestratorError> {
        let mut running = self.running.take().ok_or(OrchestratorError::NotRunning)?;
        let deadline = tokio::time::Instant::now() + self.config.pipeline.shutdown_grace();

        self.shutdown_tx.send_replace(true);
        if let Some(handle) = running.acquisition.take() {
            join_or_abort("acquisition", handle, deadline).await;
        }
        running.queue.close();
        if let Some(handle) = running.processing.take() {
            join_or_abort("processing", handle, deadline).await;
        }

        if let Err(e) = running.logger.flush().await {
            debug!("Event logger flush skipped: {}", e);
        }
        let session = match running.logger.shutdown().await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("Event logger shutdown failed: {}", e);
                None
            }
        };

        let servo_stats = {
            let mut servo = running.servo.lock().await;
            if let Err(e) = servo.shutdown().await {
                warn!("Servo shutdown incomplete: {}", e);
            }
            servo.stats()
        };

        if let Err(e) = running.frame_source.lock().await.close().await {
            warn!("Frame source close failed: {}", e);
        }

        if let Err(e) = running.position.stop().await {
            warn!("Position service stop failed: {}", e);
        }

        let report = RunReport {
            stats: self.stats.snapshot(),
            classifier: running.classifier_stats.snapshot(),
            servo: servo_stats,
            session,
        };
        info!(
            "Pipeline stopped: {} frames, {} cycles, {} tracks ({} confirmed), {} logged, {} frames dropped",
            report.stats.frames_acquired,
            report.stats.cycles,
            report.stats.tracks_created,
            report.stats.tracks_confirmed,
            report.stats.entries_logged,
            report.stats.frames_dropped
        );
        Ok(report)
    }
}

/// Tear down collaborators that were already started when startup fails
async fn unwind(
    servo: Option<&mut ServoController>,
    frame_source: Option<&mut Box<dyn FrameSource>>,
    position: &Arc<dyn PositionService>,
) {
    if let Some(servo) = servo {
        if let Err(e) = servo.shutdown().await {
            warn!("Servo release during unwind failed: {}", e);
        }
    }
    if let Some(source) = frame_source {
        if let Err(e) = source.close().await {
            warn!("Frame source close during unwind failed: {}", e);
        }
    }
    if let Err(e) = position.stop().await {
        warn!("Position service stop during unwind failed: {}", e);
    }
}

async fn join_or_abort(name: &str, mut handle: JoinHandle<()>, deadline: tokio::time::Instant) {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(())) => debug!("{} task finished", name),
        Ok(Err(e)) => error!("{} task failed: {}", name, e),
        Err(_) => {
            warn!("{} task still busy after the grace period, aborting", name);
            handle.abort();
            let _ = handle.await;
        }
    }
}

async fn acquisition_loop(
    source: SharedSource,
    queue: Arc<DropOldestQueue<Frame>>,
    stats: Arc<PipelineStats>,
    events: broadcast::Sender<PipelineEvent>,
    mut shutdown: watch::Receiver<bool>,
    max_consecutive_errors: u32,
) {
    let mut consecutive_errors = 0u32;
    loop {
        if *shutdown.borrow() {
            break;
        }
        let next = {
            let mut source = source.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = source.next_frame() => next,
            }
        };
        match next {
            Ok(Some(frame)) => {
                consecutive_errors = 0;
                stats.record_frame();
                if let Some(evicted) = queue.push(frame) {
                    stats.record_frame_dropped();
                    debug!("Frame queue full, dropped frame {}", evicted.sequence);
                    let _ = events.send(PipelineEvent::FrameDropped(evicted.sequence));
                }
            }
            Ok(None) => {
                info!("Frame source reached end of stream");
                break;
            }
            Err(e) if !e.is_transient() => {
                stats.record_acquisition_error();
                error!("Frame source failed: {}", e);
                break;
            }
            Err(e) => {
                consecutive_errors += 1;
                stats.record_acquisition_error();
                warn!("Frame acquisition failed ({} in a row): {}", consecutive_errors, e);
                if consecutive_errors > max_consecutive_errors {
                    error!("Frame stream lost after {} consecutive errors", consecutive_errors);
                    break;
                }
            }
        }
    }
    queue.close();
}

/// State of the processing task. Only this task touches the track manager.
struct Processor {
    perception: PerceptionPipeline,
    servo: Arc<Mutex<ServoController>>,
    logger: Arc<EventLogger>,
    position: Arc<dyn PositionService>,
    stats: Arc<PipelineStats>,
    events: broadcast::Sender<PipelineEvent>,
    policy: PipelineConfig,
    save_images: bool,
    frame_interval: Duration,
    last_capture: Option<DateTime<Utc>>,
    /// Category each logged track was last logged under
    logged: HashMap<TrackId, Category>,
}

impl Processor {
    async fn run(mut self, queue: Arc<DropOldestQueue<Frame>>) {
        while let Some(frame) = queue.pop().await {
            self.cycle(frame).await;
        }
        let _ = self.events.send(PipelineEvent::Finished);
        debug!("Processing task drained");
    }

    /// acquire → detect → classify → track → steer → log
    async fn cycle(&mut self, frame: Frame) {
        let dt = match self.last_capture {
            Some(previous) => (frame.captured_at - previous)
                .to_std()
                .map(|d| d.as_secs_f32())
                .unwrap_or(0.0),
            None => self.frame_interval.as_secs_f32(),
        };
        self.last_capture = Some(frame.captured_at);

        let outcome = self.perception.process(&frame).await;
        self.stats.record_cycle(outcome.regions.len());
        if outcome.frame_error {
            self.stats.record_frame_error();
        }

        for event in &outcome.update.events {
            match event {
                TrackEvent::Created(_) => self.stats.record_track_created(),
                TrackEvent::Confirmed(_) => self.stats.record_track_confirmed(),
                _ => {}
            }
            let _ = self.events.send(PipelineEvent::Track(*event));
        }
        let to_log = qualifying_entries(
            self.perception.tracker(),
            &outcome.update.events,
            &mut self.logged,
            &self.policy,
        );

        let steering = self
            .servo
            .lock()
            .await
            .cycle(
                outcome.primary.as_ref(),
                (frame.width, frame.height),
                dt,
                frame.captured_at,
            )
            .await;
        match steering {
            ServoOutcome::Steered(command) => {
                self.stats.record_steering(command.saturated);
                let _ = self.events.send(PipelineEvent::Steered(command));
            }
            ServoOutcome::Parked => {
                self.stats.record_park();
                let _ = self.events.send(PipelineEvent::Parked);
            }
            ServoOutcome::Idle => {}
            ServoOutcome::Failed(_) => self.stats.record_servo_failure(),
        }

        for (track, reason) in to_log {
            self.log(track, reason, &frame).await;
        }
    }

    async fn log(&self, track: TrackSnapshot, reason: LogReason, frame: &Frame) {
        let position = self.position.current_fix();
        let entry = LogEntry::new(
            frame.captured_at,
            frame.sequence,
            track,
            position,
            reason,
            self.save_images,
        );
        let track_id = entry.track.id;
        let classification = entry.classification;
        let image_frame = self.save_images.then(|| frame.clone());

        match self.logger.record(entry, image_frame).await {
            Ok(()) => {
                self.stats.record_logged();
                info!(
                    "{} track {} logged ({:.2}) at {}",
                    classification.category,
                    track_id,
                    classification.confidence,
                    position
                        .coordinates()
                        .map(|(lat, lon)| format!("{:.5},{:.5}", lat, lon))
                        .unwrap_or_else(|| "unknown position".to_string())
                );
                let _ = self.events.send(PipelineEvent::Logged {
                    track_id,
                    category: classification.category,
                    confidence: classification.confidence,
                    reason,
                });
            }
            Err(e) => {
                self.stats.record_log_drop();
                warn!("Detection of track {} not logged: {}", track_id, e);
            }
        }
    }
}

/// Tracks to log after an update.
///
/// A confirmed track is logged once when it first qualifies (meteor or
/// asteroid, or any category with `log_non_meteor`). A logged track is logged
/// again on a category change when `log_category_changes` is set.
fn qualifying_entries(
    tracker: &TrackManager,
    events: &[TrackEvent],
    logged: &mut HashMap<TrackId, Category>,
    policy: &PipelineConfig,
) -> Vec<(TrackSnapshot, LogReason)> {
    let mut entries = Vec::new();

    for event in events {
        match *event {
            TrackEvent::CategoryChanged { id, from, to } => {
                let Some(previous) = logged.get_mut(&id) else {
                    continue;
                };
                *previous = to;
                if policy.log_category_changes {
                    if let Some(snapshot) = tracker.snapshot(id) {
                        entries.push((snapshot, LogReason::CategoryChange { previous: from }));
                    }
                }
            }
            TrackEvent::Removed(id) => {
                logged.remove(&id);
            }
            _ => {}
        }
    }

    for track in tracker.tracks() {
        if track.state() != TrackState::Confirmed || logged.contains_key(&track.id()) {
            continue;
        }
        let category = track.category();
        if category.is_significant() || policy.log_non_meteor {
            logged.insert(track.id(), category);
            entries.push((track.snapshot(), LogReason::Detection));
        }
    }
    entries
}
