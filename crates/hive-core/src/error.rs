use thiserror::Error;

use crate::{config::ConfigError, launcher::LaunchError, signals::SignalError};

/// Errors that escape into the supervisor's control loop.
///
/// Anything reaching the loop triggers the orderly shutdown path.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to start worker for task {task}: {source}")]
    Launch {
        task: String,
        #[source]
        source: LaunchError,
    },
    #[error(transparent)]
    Signal(#[from] SignalError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("task {0} is demand-driven but no broker is configured")]
    BrokerRequired(String),
    #[error("task type {0} is registered twice")]
    DuplicateTask(String),
    #[error("supervisor is missing its {0}")]
    Missing(&'static str),
}

impl CoreError {
    /// Short label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            CoreError::Launch { .. } => "launch",
            CoreError::Signal(_) => "signal",
            CoreError::Config(_) => "config",
            CoreError::BrokerRequired(_) => "broker_required",
            CoreError::DuplicateTask(_) => "duplicate_task",
            CoreError::Missing(_) => "missing_collaborator",
        }
    }
}
