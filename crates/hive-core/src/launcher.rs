use thiserror::Error;

use hive_model::TaskDescriptor;

use crate::process::Pid;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("missing program")]
    MissingProgram,
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-start flags passed to the launched worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// The worker may exit once its queue is drained.
    pub exit_on_idle: bool,
}

/// Starts worker processes.
///
/// `start` returns as soon as the OS has created the process; it never waits for the worker to initialize.
pub trait Launcher: Send {
    fn start(&mut self, descriptor: &TaskDescriptor, opts: StartOptions) -> Result<Pid, LaunchError>;
}
