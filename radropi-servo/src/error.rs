//! Error types for radropi-servo

use crate::config::Axis;
use radropi_core::Error as CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServoError {
    #[error("Axis {axis} saturated: requested {requested:.1} deg, limit {limit:.1} deg")]
    Saturated { axis: Axis, requested: f32, limit: f32 },

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Actuator not initialized")]
    NotInitialized,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServoError {
    /// Whether retrying the same write may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ServoError::Communication(_) | ServoError::Io(_))
    }
}

impl From<ServoError> for CoreError {
    fn from(err: ServoError) -> Self {
        CoreError::Actuator(format!("Servo error: {}", err))
    }
}
