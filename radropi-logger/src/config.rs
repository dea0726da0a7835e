//! Configuration for radropi-logger

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Event logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Root directory; `detections/`, `images/` and `exports/` live beneath it
    pub log_dir: PathBuf,
    /// Entries buffered between the pipeline and the writer
    pub queue_capacity: usize,
    /// Longest the pipeline waits for queue space before dropping an entry
    pub enqueue_timeout_ms: u64,
    /// Save an annotated frame per detection
    pub save_images: bool,
    /// Append a row per detection to the daily CSV export
    pub csv_export: bool,
    /// Write `exports/session_<ts>.json` at shutdown
    pub session_export: bool,
    /// Files older than this are removed at startup; 0 keeps everything
    pub retention_days: u32,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            queue_capacity: 64,
            enqueue_timeout_ms: 20,
            save_images: true,
            csv_export: true,
            session_export: true,
            retention_days: 30,
        }
    }
}

impl LoggerConfig {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn detections_dir(&self) -> PathBuf {
        self.log_dir.join("detections")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.log_dir.join("images")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.log_dir.join("exports")
    }

    /// Same settings rooted at `dir`
    pub fn with_log_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.log_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.queue_capacity == 0 {
            return Err("Log queue_capacity must be at least 1".to_string());
        }
        if self.enqueue_timeout_ms == 0 {
            return Err("enqueue_timeout_ms must be non-zero".to_string());
        }
        if self.enqueue_timeout_ms > 1_000 {
            return Err("enqueue_timeout_ms above 1000 would stall the pipeline".to_string());
        }
        if self.log_dir.as_os_str().is_empty() {
            return Err("log_dir must not be empty".to_string());
        }
        Ok(())
    }
}
