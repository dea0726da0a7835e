//! radropi-gps: position and time for detection records
//!
//! Parses NMEA GGA/RMC/GSA sentences from a receiver into a
//! [`PositionFix`](radropi_core::PositionFix) snapshot. A fix older than the
//! freshness window is reported as invalid rather than substituted.

pub mod config;
pub mod error;
pub mod nmea;
pub mod service;

pub use config::GpsConfig;
pub use error::GpsError;
pub use nmea::{fix_quality_description, parse_sentence, FixAccumulator, NmeaSentence};
pub use service::{GpsStats, MockPositionService, NmeaReceiver, PositionService};
