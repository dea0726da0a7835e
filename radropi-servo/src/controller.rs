//! Steering and parking logic

use crate::actuator::Actuator;
use crate::config::{Axis, ServoConfig};
use crate::error::ServoError;
use chrono::{DateTime, Utc};
use radropi_core::{TrackId, TrackSnapshot, TrackingCommand};
use serde::Serialize;
use tracing::{debug, info, warn};

/// What the controller did this cycle
#[derive(Debug, Clone, PartialEq)]
pub enum ServoOutcome {
    /// A steering command was applied (possibly clamped)
    Steered(TrackingCommand),
    /// All axes returned to rest after the idle period
    Parked,
    /// Nothing to do
    Idle,
    /// Writes failed after retries; the cycle carries on without steering
    Failed(String),
}

/// Counters kept by the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServoStats {
    pub commands: u64,
    pub saturations: u64,
    pub write_failures: u64,
    pub retries: u64,
    pub parks: u64,
}

/// Angular move computed for one cycle, before it is written
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteeringMove {
    pub pan_delta_deg: f32,
    pub tilt_delta_deg: f32,
    pub azimuth_deg: f32,
    pub elevation_deg: f32,
    pub saturated: bool,
}

/// Turns the primary track's image offset into bounded dish moves and parks
/// the mount when nothing has been tracked for `idle_period_ms`.
///
/// Idle time is measured with the cycle timestamps handed in by the caller,
/// so replayed and synthetic runs behave like live ones.
pub struct ServoController {
    config: ServoConfig,
    actuator: Box<dyn Actuator>,
    /// Believed position per axis, indexed by `Axis::index`
    positions: [f32; 4],
    idle_since: Option<DateTime<Utc>>,
    parked: bool,
    stats: ServoStats,
}

impl ServoController {
    pub fn new(config: ServoConfig, actuator: Box<dyn Actuator>) -> Self {
        let positions = Axis::ALL.map(|axis| config.axis(axis).rest_deg);
        Self {
            config,
            actuator,
            positions,
            idle_since: None,
            parked: false,
            stats: ServoStats::default(),
        }
    }

    /// Connect the actuator and move every axis to rest
    pub async fn initialize(&mut self) -> Result<(), ServoError> {
        self.actuator.connect().await?;
        for axis in Axis::ALL {
            let rest = self.config.axis(axis).rest_deg;
            self.write_axis(axis, rest).await?;
        }
        info!("Servos homed via {} actuator", self.actuator.name());
        Ok(())
    }

    pub fn position(&self, axis: Axis) -> f32 {
        self.positions[axis.index()]
    }

    pub fn is_parked(&self) -> bool {
        self.parked
    }

    pub fn stats(&self) -> ServoStats {
        self.stats
    }

    pub fn config(&self) -> &ServoConfig {
        &self.config
    }

    /// Compute the move toward `offset` (pixels from frame center) without
    /// touching the actuator
    pub fn plan(&self, offset: (f32, f32), frame_size: (u32, u32), dt_secs: f32) -> SteeringMove {
        let (fov_x, fov_y) = self.config.fov_deg;
        let width = frame_size.0.max(1) as f32;
        let height = frame_size.1.max(1) as f32;
        let finite_or_zero = |v: f32| if v.is_finite() { v } else { 0.0 };

        let pan_raw = finite_or_zero(offset.0) * (fov_x / width) * self.config.kp;
        // image y grows downward, elevation grows upward
        let tilt_raw = -finite_or_zero(offset.1) * (fov_y / height) * self.config.kp;

        let rate_cap = self.config.max_rate_deg_per_s * finite_or_zero(dt_secs).max(0.0);
        let cap = rate_cap.min(self.config.max_delta_per_cycle_deg);
        let pan = pan_raw.clamp(-cap, cap);
        let tilt = tilt_raw.clamp(-cap, cap);

        let azimuth = self.position(Axis::DishAzimuth);
        let elevation = self.position(Axis::DishElevation);
        let (azimuth_deg, az_saturated) = self.bounded(Axis::DishAzimuth, azimuth + pan);
        let (elevation_deg, el_saturated) = self.bounded(Axis::DishElevation, elevation + tilt);

        SteeringMove {
            pan_delta_deg: azimuth_deg - azimuth,
            tilt_delta_deg: elevation_deg - elevation,
            azimuth_deg,
            elevation_deg,
            saturated: az_saturated || el_saturated,
        }
    }

    fn bounded(&self, axis: Axis, angle: f32) -> (f32, bool) {
        let limits = self.config.axis(axis);
        match limits.check(axis, angle) {
            Ok(angle) => (angle, false),
            Err(ServoError::Saturated { limit, .. }) => (limit, true),
            Err(_) => (angle.clamp(limits.min_deg, limits.max_deg), true),
        }
    }

    /// Steer the dish toward a target `offset` pixels from frame center
    pub async fn steer(
        &mut self,
        track_id: TrackId,
        offset: (f32, f32),
        frame_size: (u32, u32),
        dt_secs: f32,
        now: DateTime<Utc>,
    ) -> Result<TrackingCommand, ServoError> {
        let planned = self.plan(offset, frame_size, dt_secs);
        if planned.saturated {
            self.stats.saturations += 1;
            debug!("Track {} steering clamped at travel limit", track_id);
        }

        let azimuth = self.write_axis(Axis::DishAzimuth, planned.azimuth_deg).await;
        let elevation = self.write_axis(Axis::DishElevation, planned.elevation_deg).await;
        azimuth?;
        elevation?;

        self.stats.commands += 1;
        Ok(TrackingCommand {
            track_id,
            pan_delta_deg: planned.pan_delta_deg,
            tilt_delta_deg: planned.tilt_delta_deg,
            issued_at: now,
            saturated: planned.saturated,
        })
    }

    /// One controller cycle: steer toward the primary track, or count idle
    /// time and park once it exceeds the idle period
    pub async fn cycle(
        &mut self,
        primary: Option<&TrackSnapshot>,
        frame_size: (u32, u32),
        dt_secs: f32,
        now: DateTime<Utc>,
    ) -> ServoOutcome {
        match primary {
            Some(track) => {
                self.idle_since = None;
                self.parked = false;
                let (cx, cy) = track.bbox.center();
                let offset = (cx - frame_size.0 as f32 / 2.0, cy - frame_size.1 as f32 / 2.0);
                match self.steer(track.id, offset, frame_size, dt_secs, now).await {
                    Ok(command) => ServoOutcome::Steered(command),
                    Err(e) => {
                        warn!("Steering toward track {} failed: {}", track.id, e);
                        ServoOutcome::Failed(e.to_string())
                    }
                }
            }
            None => {
                let since = *self.idle_since.get_or_insert(now);
                let idle_ms = (now - since).num_milliseconds();
                if self.parked || idle_ms <= self.config.idle_period_ms as i64 {
                    return ServoOutcome::Idle;
                }
                match self.park().await {
                    Ok(()) => ServoOutcome::Parked,
                    Err(e) => {
                        warn!("Parking failed: {}", e);
                        ServoOutcome::Failed(e.to_string())
                    }
                }
            }
        }
    }

    /// Return all four axes to rest. Every axis is attempted even if one fails.
    pub async fn park(&mut self) -> Result<(), ServoError> {
        let mut first_error = None;
        for axis in Axis::ALL {
            let rest = self.config.axis(axis).rest_deg;
            if let Err(e) = self.write_axis(axis, rest).await {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        self.parked = true;
        self.stats.parks += 1;
        info!("Servos parked");
        Ok(())
    }

    /// Park and release the actuator
    pub async fn shutdown(&mut self) -> Result<(), ServoError> {
        let parked = if self.parked { Ok(()) } else { self.park().await };
        self.actuator.disconnect().await?;
        info!("Servo actuator released");
        parked
    }

    /// Write with retries under the command timeout. The believed position
    /// changes only when the write lands.
    async fn write_axis(&mut self, axis: Axis, angle: f32) -> Result<(), ServoError> {
        let timeout = self.config.command_timeout();
        let attempts = self.config.write_retries + 1;
        let mut last_error = ServoError::NotInitialized;

        for attempt in 0..attempts {
            if attempt > 0 {
                self.stats.retries += 1;
            }
            match tokio::time::timeout(timeout, self.actuator.write(axis, angle)).await {
                Ok(Ok(())) => {
                    self.positions[axis.index()] = angle;
                    return Ok(());
                }
                Ok(Err(e)) => {
                    debug!("Write to {} failed (attempt {}): {}", axis, attempt + 1, e);
                    let transient = e.is_transient();
                    last_error = e;
                    if !transient {
                        break;
                    }
                }
                Err(_) => {
                    debug!("Write to {} timed out (attempt {})", axis, attempt + 1);
                    last_error = ServoError::Communication(format!("Write to {} timed out after {:?}", axis, timeout));
                }
            }
        }

        self.stats.write_failures += 1;
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{MockActuator, MockHandle};
    use radropi_core::{BoundingBox, Category, TrackState};

    async fn controller(config: ServoConfig) -> (ServoController, MockHandle) {
        let actuator = MockActuator::new();
        let handle = actuator.handle();
        let mut controller = ServoController::new(config, Box::new(actuator));
        controller.initialize().await.unwrap();
        handle.clear();
        (controller, handle)
    }

    fn track_at(cx: f32, cy: f32) -> TrackSnapshot {
        let now = Utc::now();
        TrackSnapshot {
            id: 1,
            bbox: BoundingBox::new(cx - 2.0, cy - 2.0, 4.0, 4.0),
            velocity: (0.0, 0.0),
            category: Category::Meteor,
            confidence: 0.9,
            state: TrackState::Confirmed,
            age: 0,
            hits: 3,
            lifetime: 3,
            first_seen: now,
            last_seen: now,
        }
    }

    #[tokio::test]
    async fn test_initialize_homes_all_axes() {
        let actuator = MockActuator::new();
        let handle = actuator.handle();
        let mut controller = ServoController::new(ServoConfig::default(), Box::new(actuator));
        controller.initialize().await.unwrap();
        assert_eq!(handle.writes().len(), 4);
        assert_eq!(controller.position(Axis::CameraTilt), 90.0);
    }

    #[tokio::test]
    async fn test_steer_direction_and_rate_limit() {
        let (mut controller, handle) = controller(ServoConfig::default()).await;
        // target right of and below center
        let command = controller
            .steer(1, (100.0, 50.0), (640, 480), 0.1, Utc::now())
            .await
            .unwrap();
        assert!(command.pan_delta_deg > 0.0);
        assert!(command.tilt_delta_deg < 0.0);
        // 30 deg/s over 100 ms
        assert!((command.pan_delta_deg - 3.0).abs() < 1e-4);
        assert!(!command.saturated);
        assert_eq!(handle.writes_for(Axis::DishAzimuth), vec![93.0]);
    }

    #[tokio::test]
    async fn test_small_offset_proportional() {
        let (controller, _) = controller(ServoConfig::default()).await;
        let planned = controller.plan((10.0, 0.0), (600, 480), 1.0);
        // 10 px * 60/600 deg/px * 0.5
        assert!((planned.pan_delta_deg - 0.5).abs() < 1e-5);
        assert_eq!(planned.tilt_delta_deg, 0.0);
    }

    #[tokio::test]
    async fn test_saturation_clamps_and_reports() {
        let config = ServoConfig {
            dish_elevation: crate::config::AxisConfig::new(0.0, 90.0, 89.0),
            ..ServoConfig::default()
        };
        let (mut controller, _) = controller(config).await;
        // target above center raises elevation past its limit
        let command = controller
            .steer(1, (0.0, -200.0), (640, 480), 1.0, Utc::now())
            .await
            .unwrap();
        assert!(command.saturated);
        assert!((command.tilt_delta_deg - 1.0).abs() < 1e-4);
        assert_eq!(controller.position(Axis::DishElevation), 90.0);
        assert_eq!(controller.stats().saturations, 1);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let (mut controller, handle) = controller(ServoConfig::default()).await;
        handle.fail_next(2);
        let outcome = controller
            .cycle(Some(&track_at(400.0, 240.0)), (640, 480), 0.1, Utc::now())
            .await;
        assert!(matches!(outcome, ServoOutcome::Steered(_)));
        assert_eq!(controller.stats().retries, 2);
        assert_eq!(controller.stats().write_failures, 0);
    }

    #[tokio::test]
    async fn test_failure_keeps_believed_position() {
        let (mut controller, handle) = controller(ServoConfig::default()).await;
        handle.set_always_fail(true);
        let outcome = controller
            .cycle(Some(&track_at(600.0, 240.0)), (640, 480), 0.1, Utc::now())
            .await;
        assert!(matches!(outcome, ServoOutcome::Failed(_)));
        assert_eq!(controller.position(Axis::DishAzimuth), 90.0);
        assert_eq!(controller.stats().write_failures, 2);
    }

    #[tokio::test]
    async fn test_stalled_write_bounded_by_timeout() {
        let config = ServoConfig {
            command_timeout_ms: 10,
            write_retries: 1,
            ..ServoConfig::default()
        };
        let (mut controller, handle) = controller(config).await;
        handle.set_stall(true);
        let started = std::time::Instant::now();
        let result = controller.steer(1, (50.0, 0.0), (640, 480), 0.1, Utc::now()).await;
        assert!(matches!(result, Err(ServoError::Communication(_))));
        assert!(started.elapsed() < std::time::Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_parks_once_after_idle_period() {
        let config = ServoConfig {
            idle_period_ms: 1_000,
            ..ServoConfig::default()
        };
        let (mut controller, handle) = controller(config).await;
        let start = Utc::now();
        let mut parks = 0;
        for i in 0..30 {
            let now = start + chrono::Duration::milliseconds(100 * i);
            if controller.cycle(None, (640, 480), 0.1, now).await == ServoOutcome::Parked {
                parks += 1;
            }
        }
        assert_eq!(parks, 1);
        assert_eq!(handle.writes().len(), 4);
        assert!(controller.is_parked());
    }

    #[tokio::test]
    async fn test_track_resets_idle_clock() {
        let config = ServoConfig {
            idle_period_ms: 500,
            ..ServoConfig::default()
        };
        let (mut controller, _) = controller(config).await;
        let start = Utc::now();
        let at = |ms: i64| start + chrono::Duration::milliseconds(ms);

        assert_eq!(controller.cycle(None, (640, 480), 0.1, at(0)).await, ServoOutcome::Idle);
        assert_eq!(controller.cycle(None, (640, 480), 0.1, at(400)).await, ServoOutcome::Idle);
        controller.cycle(Some(&track_at(320.0, 240.0)), (640, 480), 0.1, at(450)).await;
        assert_eq!(controller.cycle(None, (640, 480), 0.1, at(900)).await, ServoOutcome::Idle);
        assert_eq!(controller.cycle(None, (640, 480), 0.1, at(1500)).await, ServoOutcome::Parked);
    }

    #[tokio::test]
    async fn test_shutdown_parks_and_releases() {
        let (mut controller, handle) = controller(ServoConfig::default()).await;
        controller.shutdown().await.unwrap();
        assert_eq!(handle.writes().len(), 4);
        assert!(!handle.is_connected());
    }
}
