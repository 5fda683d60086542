mod error;
pub use error::{ExecError, ExecResult};

pub mod os;
pub use os::{OsProcesses, become_session_leader};

pub mod proc;
pub use proc::{ProcLauncher, WORK_SUBCOMMAND};

pub mod worker;
pub use worker::{Control, WorkerOutcome, context_from_env, run_worker};

pub mod prelude {
    pub use crate::error::{ExecError, ExecResult};
    pub use crate::{OsProcesses, ProcLauncher, run_worker};
}
