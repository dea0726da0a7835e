//! Error types for radropi-logger

use radropi_core::Error as CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Log queue full, entry dropped")]
    QueueFull,

    #[error("Logger closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for LoggerError {
    fn from(err: serde_json::Error) -> Self {
        LoggerError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for LoggerError {
    fn from(err: csv::Error) -> Self {
        LoggerError::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for LoggerError {
    fn from(err: image::ImageError) -> Self {
        LoggerError::Image(err.to_string())
    }
}

impl From<LoggerError> for CoreError {
    fn from(err: LoggerError) -> Self {
        CoreError::Logging(err.to_string())
    }
}
