//! Error types for radropi-eye

use radropi_core::Error as CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Frame error: {0}")]
    Frame(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl VisionError {
    /// Faults a frame source can recover from by trying the next frame
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VisionError::Camera(_) | VisionError::Frame(_) | VisionError::Io(_) | VisionError::Image(_)
        )
    }
}

impl From<VisionError> for CoreError {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::Core(inner) => inner,
            VisionError::Config(msg) => CoreError::Configuration(msg),
            other => CoreError::Sensor(format!("Vision error: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropout_is_transient() {
        assert!(VisionError::Camera("dropout".to_string()).is_transient());
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "frame_0001.png");
        assert!(VisionError::from(io).is_transient());
        assert!(!VisionError::Config("frame_rate".to_string()).is_transient());
        assert!(!VisionError::Model("weights".to_string()).is_transient());
    }

    #[test]
    fn test_vision_error_to_core_error() {
        let core_err: CoreError = VisionError::Frame("short buffer".to_string()).into();
        match core_err {
            CoreError::Sensor(msg) => {
                assert!(msg.contains("Vision error"));
                assert!(msg.contains("short buffer"));
            }
            _ => panic!("Expected Sensor error"),
        }
        let core_err: CoreError = VisionError::Config("bad".to_string()).into();
        assert!(matches!(core_err, CoreError::Configuration(_)));
    }
}
