//! Process identifiers, signals and exit statuses shared by the supervisor and its collaborators.
use std::fmt;

use nix::sys::{signal::Signal as OsSignal, wait::WaitStatus};
use thiserror::Error;

/// OS process id of a worker.
pub use nix::unistd::Pid;

/// Signals the supervisor arms, forwards or sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Int,
    Term,
    Quit,
    Hup,
    Chld,
    Kill,
    Usr1,
    Usr2,
}

impl Signal {
    pub fn to_os(self) -> OsSignal {
        match self {
            Signal::Int => OsSignal::SIGINT,
            Signal::Term => OsSignal::SIGTERM,
            Signal::Quit => OsSignal::SIGQUIT,
            Signal::Hup => OsSignal::SIGHUP,
            Signal::Chld => OsSignal::SIGCHLD,
            Signal::Kill => OsSignal::SIGKILL,
            Signal::Usr1 => OsSignal::SIGUSR1,
            Signal::Usr2 => OsSignal::SIGUSR2,
        }
    }

    pub fn from_os(signal: OsSignal) -> Option<Self> {
        match signal {
            OsSignal::SIGINT => Some(Signal::Int),
            OsSignal::SIGTERM => Some(Signal::Term),
            OsSignal::SIGQUIT => Some(Signal::Quit),
            OsSignal::SIGHUP => Some(Signal::Hup),
            OsSignal::SIGCHLD => Some(Signal::Chld),
            OsSignal::SIGKILL => Some(Signal::Kill),
            OsSignal::SIGUSR1 => Some(Signal::Usr1),
            OsSignal::SIGUSR2 => Some(Signal::Usr2),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> i32 {
        self.to_os() as i32
    }

    pub fn from_raw(raw: i32) -> Option<Self> {
        OsSignal::try_from(raw).ok().and_then(Self::from_os)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Signal::Int => "INT",
            Signal::Term => "TERM",
            Signal::Quit => "QUIT",
            Signal::Hup => "HUP",
            Signal::Chld => "CHLD",
            Signal::Kill => "KILL",
            Signal::Usr1 => "USR1",
            Signal::Usr2 => "USR2",
        }
    }

    /// INT, TERM and QUIT all request a stop.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Signal::Int | Signal::Term | Signal::Quit)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a reaped child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(i32),
    Signaled(i32),
}

impl ExitStatus {
    /// Split a `waitpid` result into pid and status; `None` for anything but a terminated child.
    pub fn from_wait_status(status: WaitStatus) -> Option<(Pid, Self)> {
        match status {
            WaitStatus::Exited(pid, code) => Some((pid, ExitStatus::Exited(code))),
            WaitStatus::Signaled(pid, signal, _) => Some((pid, ExitStatus::Signaled(signal as i32))),
            _ => None,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit code {code}"),
            ExitStatus::Signaled(sig) => match Signal::from_raw(*sig) {
                Some(s) => write!(f, "signal {s}"),
                None => write!(f, "signal {sig}"),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("no such process: {0}")]
    NoSuchProcess(Pid),
    #[error("os error: {0}")]
    Os(#[from] std::io::Error),
}

/// Signal delivery to, and exit collection from, worker processes.
pub trait ProcessControl: Send {
    fn signal(&self, pid: Pid, signal: Signal) -> Result<(), ProcessError>;

    /// Collect one exited child without blocking; `Ok(None)` when nothing is ready.
    fn try_reap(&mut self) -> Result<Option<(Pid, ExitStatus)>, ProcessError>;
}
