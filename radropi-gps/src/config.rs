//! Configuration for radropi-gps

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Position service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    /// Receiver serial device; `None` selects the mock service
    pub port: Option<String>,
    pub baud_rate: u32,
    /// A valid fix older than this is reported as invalid
    pub freshness_ms: u64,
    /// Location reported by the mock service
    pub mock_latitude: f64,
    pub mock_longitude: f64,
    pub mock_altitude_m: f64,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            freshness_ms: 5_000,
            mock_latitude: 40.7128,
            mock_longitude: -74.0060,
            mock_altitude_m: 10.0,
        }
    }
}

impl GpsConfig {
    pub fn freshness(&self) -> Duration {
        Duration::from_millis(self.freshness_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.baud_rate == 0 {
            return Err("GPS baud_rate must be non-zero".to_string());
        }
        if self.freshness_ms == 0 {
            return Err("freshness_ms must be non-zero".to_string());
        }
        if !(-90.0..=90.0).contains(&self.mock_latitude) || !(-180.0..=180.0).contains(&self.mock_longitude) {
            return Err("Mock coordinates out of range".to_string());
        }
        if let Some(port) = &self.port {
            if port.trim().is_empty() {
                return Err("GPS port must not be empty".to_string());
            }
        }
        Ok(())
    }
}
