//! radropi-logger: detection event persistence
//!
//! Qualifying detections are handed to [`EventLogger::record`], which only
//! waits a bounded time to enqueue. A dedicated writer turns each entry into
//! a JSON-lines record, a CSV row and an annotated PNG. Session statistics
//! are exported as JSON when the logger shuts down.

pub mod config;
pub mod error;
pub mod logger;
pub mod record;
pub mod session;
mod writer;

pub use config::LoggerConfig;
pub use error::LoggerError;
pub use logger::{cleanup_old_files, EventLogger};
pub use record::{read_csv, CsvRow, DetectionRecord, RecordedPosition};
pub use session::{SessionStats, SessionSummary};
