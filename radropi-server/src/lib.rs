//! radropi-server: wiring and lifecycle of the sky watcher
//!
//! [`Orchestrator`] brings the sensors up in dependency order, runs the
//! acquisition and processing tasks connected by a drop-oldest frame queue,
//! and tears everything down in reverse order on shutdown.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod sensors;
pub mod stats;

pub use config::{ClassifierChoice, PipelineConfig, SystemConfig};
pub use error::OrchestratorError;
pub use orchestrator::{Orchestrator, PipelineEvent, RunReport};
pub use queue::DropOldestQueue;
pub use sensors::Components;
pub use stats::{PipelineStats, StatsSnapshot};
