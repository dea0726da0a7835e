//! Error types for radropi-server

use radropi_core::Error as CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Startup failed at {component}: {reason}")]
    Startup { component: &'static str, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pipeline is not running")]
    NotRunning,

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl OrchestratorError {
    pub(crate) fn startup(component: &'static str, reason: impl ToString) -> Self {
        OrchestratorError::Startup {
            component,
            reason: reason.to_string(),
        }
    }
}

impl From<OrchestratorError> for CoreError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Core(inner) => inner,
            OrchestratorError::Config(msg) => CoreError::Configuration(msg),
            other => CoreError::Pipeline(other.to_string()),
        }
    }
}
