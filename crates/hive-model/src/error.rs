use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("task name must not be empty")]
    EmptyName,
    #[error("task name {0:?} contains whitespace or control characters")]
    InvalidName(String),
    #[error("unknown work model: {0} (expected: steady|demand-driven)")]
    UnknownWorkModel(String),
    #[error("task {0}: max_workers must be at least 1")]
    ZeroWorkers(String),
    #[error("task {0}: queue name must not be empty")]
    EmptyQueue(String),
}
