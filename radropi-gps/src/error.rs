//! Error types for radropi-gps

use radropi_core::Error as CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GpsError {
    #[error("NMEA parse error: {0}")]
    Parse(String),

    #[error("NMEA checksum mismatch: expected {expected:02X}, computed {computed:02X}")]
    Checksum { expected: u8, computed: u8 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<GpsError> for CoreError {
    fn from(err: GpsError) -> Self {
        CoreError::Sensor(format!("GPS error: {}", err))
    }
}
