//! Configuration for radropi-servo

use crate::error::ServoError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The four servos on the mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    DishAzimuth,
    DishElevation,
    CameraPan,
    CameraTilt,
}

impl Axis {
    pub const ALL: [Axis; 4] = [
        Axis::DishAzimuth,
        Axis::DishElevation,
        Axis::CameraPan,
        Axis::CameraTilt,
    ];

    /// Driver board channel
    pub fn channel(self) -> u8 {
        match self {
            Axis::DishAzimuth => 0,
            Axis::DishElevation => 1,
            Axis::CameraPan => 2,
            Axis::CameraTilt => 3,
        }
    }

    pub fn index(self) -> usize {
        self.channel() as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Axis::DishAzimuth => "dish_azimuth",
            Axis::DishElevation => "dish_elevation",
            Axis::CameraPan => "camera_pan",
            Axis::CameraTilt => "camera_tilt",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Travel limits and rest orientation of one axis, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    pub min_deg: f32,
    pub max_deg: f32,
    pub rest_deg: f32,
}

impl AxisConfig {
    pub const fn new(min_deg: f32, max_deg: f32, rest_deg: f32) -> Self {
        Self {
            min_deg,
            max_deg,
            rest_deg,
        }
    }

    /// Accept `angle` if within travel, otherwise report the violated limit
    pub fn check(&self, axis: Axis, angle: f32) -> Result<f32, ServoError> {
        if angle < self.min_deg {
            Err(ServoError::Saturated {
                axis,
                requested: angle,
                limit: self.min_deg,
            })
        } else if angle > self.max_deg {
            Err(ServoError::Saturated {
                axis,
                requested: angle,
                limit: self.max_deg,
            })
        } else {
            Ok(angle)
        }
    }

    fn validate(&self, axis: Axis) -> Result<(), String> {
        if !(self.min_deg.is_finite() && self.max_deg.is_finite() && self.rest_deg.is_finite()) {
            return Err(format!("{} limits must be finite", axis));
        }
        if self.min_deg >= self.max_deg {
            return Err(format!("{} min_deg must be below max_deg", axis));
        }
        if self.rest_deg < self.min_deg || self.rest_deg > self.max_deg {
            return Err(format!("{} rest_deg must lie within its travel", axis));
        }
        Ok(())
    }
}

/// Servo controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    pub dish_azimuth: AxisConfig,
    pub dish_elevation: AxisConfig,
    pub camera_pan: AxisConfig,
    pub camera_tilt: AxisConfig,
    /// Camera field of view (horizontal, vertical) in degrees
    pub fov_deg: (f32, f32),
    /// Proportional gain applied to the angular offset
    pub kp: f32,
    pub max_rate_deg_per_s: f32,
    pub max_delta_per_cycle_deg: f32,
    /// Quiet time without a primary track before the mount parks
    pub idle_period_ms: u64,
    /// Extra attempts per axis write
    pub write_retries: u32,
    /// Bound on a single actuator write
    pub command_timeout_ms: u64,
    /// Driver board serial device; `None` selects the mock actuator
    pub serial_port: Option<String>,
    pub baud_rate: u32,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            dish_azimuth: AxisConfig::new(0.0, 180.0, 90.0),
            dish_elevation: AxisConfig::new(0.0, 90.0, 45.0),
            camera_pan: AxisConfig::new(0.0, 180.0, 90.0),
            camera_tilt: AxisConfig::new(30.0, 150.0, 90.0),
            fov_deg: (60.0, 45.0),
            kp: 0.5,
            max_rate_deg_per_s: 30.0,
            max_delta_per_cycle_deg: 5.0,
            idle_period_ms: 30_000,
            write_retries: 2,
            command_timeout_ms: 100,
            serial_port: None,
            baud_rate: 115_200,
        }
    }
}

impl ServoConfig {
    pub fn axis(&self, axis: Axis) -> &AxisConfig {
        match axis {
            Axis::DishAzimuth => &self.dish_azimuth,
            Axis::DishElevation => &self.dish_elevation,
            Axis::CameraPan => &self.camera_pan,
            Axis::CameraTilt => &self.camera_tilt,
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn idle_period(&self) -> Duration {
        Duration::from_millis(self.idle_period_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        for axis in Axis::ALL {
            self.axis(axis).validate(axis)?;
        }
        if !(self.fov_deg.0 > 0.0 && self.fov_deg.0 < 180.0 && self.fov_deg.1 > 0.0 && self.fov_deg.1 < 180.0) {
            return Err("Field of view must be between 0 and 180 degrees".to_string());
        }
        if !(self.kp > 0.0 && self.kp.is_finite()) {
            return Err("kp must be positive".to_string());
        }
        if !(self.max_rate_deg_per_s > 0.0) || !(self.max_delta_per_cycle_deg > 0.0) {
            return Err("Rate limits must be positive".to_string());
        }
        if self.command_timeout_ms == 0 {
            return Err("command_timeout_ms must be non-zero".to_string());
        }
        if self.write_retries > 10 {
            return Err("write_retries too large (max 10)".to_string());
        }
        if self.baud_rate == 0 {
            return Err("baud_rate must be non-zero".to_string());
        }
        Ok(())
    }
}
