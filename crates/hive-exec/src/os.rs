//! `kill(2)` / `waitpid(2)` backed process control.
use nix::{
    errno::Errno,
    sys::{
        signal::kill,
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::{geteuid, setsid},
};
use tracing::{debug, info};

use hive_core::{ExitStatus, Pid, ProcessControl, ProcessError, Signal};

/// Signals and reaps real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcesses;

impl OsProcesses {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessControl for OsProcesses {
    fn signal(&self, pid: Pid, signal: Signal) -> Result<(), ProcessError> {
        match kill(pid, signal.to_os()) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(ProcessError::NoSuchProcess(pid)),
            Err(e) => Err(ProcessError::Os(e.into())),
        }
    }

    /// One non-blocking `waitpid(-1)`; `None` when nothing has exited or there are no children.
    fn try_reap(&mut self) -> Result<Option<(Pid, ExitStatus)>, ProcessError> {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => return Ok(None),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(ProcessError::Os(e.into())),
                Ok(status) => {
                    // Stops and continues are not exits; look for the next event.
                    let Some((pid, status)) = ExitStatus::from_wait_status(status) else {
                        continue;
                    };
                    debug!(target: "hive.exec.os", pid = pid.as_raw(), %status, "reaped");
                    return Ok(Some((pid, status)));
                }
            }
        }
    }
}

/// Detach from the controlling terminal when running as root.
///
/// Returns `true` if a new session was created. Failure (already a group leader) is not an error.
pub fn become_session_leader() -> bool {
    if !geteuid().is_root() {
        return false;
    }
    if let Err(e) = setsid() {
        debug!(target: "hive.exec.os", error = %e, "setsid skipped");
        return false;
    }
    info!(target: "hive.exec.os", "running as session leader");
    true
}
