//! Child-side setup run between `fork()` and `execve()`.
//!
//! Everything here executes inside a `pre_exec` hook, so it is restricted to
//! async-signal-safe calls and must not allocate.
//!
//! The hook:
//! - moves the worker into its own process group, so terminal-generated signals reach
//!   the supervisor only;
//! - restores default dispositions for the signals the supervisor handles and clears the
//!   blocked mask inherited from the parent thread;
//! - applies the configured [`ResourceLimits`].
use std::{io, os::unix::process::CommandExt, process::Command};

use nix::{
    sys::signal::{SigHandler, SigSet, SigmaskHow, Signal, pthread_sigmask, signal},
    unistd::{Pid, setpgid},
};

use hive_model::ResourceLimits;

/// Dispositions reset to `SIG_DFL` in the child.
const RESET_SIGNALS: [Signal; 5] = [
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGQUIT,
    Signal::SIGHUP,
    Signal::SIGCHLD,
];

/// Install the worker `pre_exec` hook on `cmd`.
pub fn prepare_child(cmd: &mut Command, limits: ResourceLimits) {
    // SAFETY: the closure only calls async-signal-safe functions and captures `Copy` data.
    unsafe {
        cmd.pre_exec(move || {
            setpgid(Pid::from_raw(0), Pid::from_raw(0))?;
            reset_signals()?;
            apply_limits(&limits)
        });
    }
}

fn reset_signals() -> io::Result<()> {
    for sig in RESET_SIGNALS {
        // SAFETY: installing SIG_DFL runs no Rust code in signal context.
        unsafe { signal(sig, SigHandler::SigDfl) }?;
    }
    pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None)?;
    Ok(())
}

fn apply_limits(limits: &ResourceLimits) -> io::Result<()> {
    if let Some(nofile) = limits.max_open_files {
        apply_rlimit(libc::RLIMIT_NOFILE, nofile)?;
    }
    if let Some(fsize) = limits.max_file_size_bytes {
        apply_rlimit(libc::RLIMIT_FSIZE, fsize)?;
    }
    if limits.disable_core_dumps {
        apply_rlimit(libc::RLIMIT_CORE, 0)?;
    }
    Ok(())
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type Resource = libc::__rlimit_resource_t;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
type Resource = libc::c_int;

fn apply_rlimit(resource: Resource, value: u64) -> io::Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    let rc = unsafe { libc::setrlimit(resource, &rlim) };
    if rc != 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
