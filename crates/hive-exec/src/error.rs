use thiserror::Error;

use hive_core::LaunchError;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("missing program")]
    MissingProgram,
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("runtime: {0}")]
    Runtime(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ExecResult<T> = Result<T, ExecError>;

impl From<ExecError> for LaunchError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::MissingProgram => LaunchError::MissingProgram,
            ExecError::Io(e) => LaunchError::Io(e),
            other => LaunchError::Spawn(other.to_string()),
        }
    }
}
