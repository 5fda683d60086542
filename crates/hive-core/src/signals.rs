//! # Deferred signal delivery.
//!
//! The OS handler installed by [`SignalBroker::arm`] does only async-signal-safe work: it
//! writes the signal number as one byte into the self-pipe of every broker that armed it.
//! The supervisor later calls [`SignalSource::wait_for_signals`], which blocks in `poll(2)`
//! on the read end and drains whatever arrived, in arrival order.
//!
//! If a pipe is full the handler sets a bit in the broker's overflow mask instead; the
//! waiter is already awake because the pipe is readable, and the drain appends the
//! overflowed signals after the bytes it read.
//!
//! Handler state lives in fixed static slots so the handler never allocates or locks.
//! Each broker owns one slot for its lifetime.
use std::{
    fs::File,
    io::{self, Read},
    os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd},
    sync::atomic::{AtomicI32, AtomicU64, Ordering},
    time::Duration,
};

use nix::{
    errno::Errno,
    fcntl::OFlag,
    poll::{PollFd, PollFlags, PollTimeout, poll},
    sys::signal::{SaFlags, SigAction, SigHandler, SigSet, sigaction},
    unistd::{pipe2, write},
};
use thiserror::Error;
use tracing::{debug, trace};

use crate::process::Signal;

const MAX_BROKERS: usize = 32;

static WRITE_FDS: [AtomicI32; MAX_BROKERS] = [const { AtomicI32::new(-1) }; MAX_BROKERS];
static ARMED: [AtomicU64; MAX_BROKERS] = [const { AtomicU64::new(0) }; MAX_BROKERS];
static OVERFLOW: [AtomicU64; MAX_BROKERS] = [const { AtomicU64::new(0) }; MAX_BROKERS];

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("all signal broker slots are in use")]
    NoFreeSlot,
    #[error("cannot handle {0}")]
    Unsupported(Signal),
    #[error("signal setup failed: {0}")]
    Os(#[from] io::Error),
}

impl From<Errno> for SignalError {
    fn from(e: Errno) -> Self {
        SignalError::Os(e.into())
    }
}

/// Source of deferred signals for the supervisor loop.
pub trait SignalSource: Send {
    /// Route `signals` through the deferred path.
    fn arm(&mut self, signals: &[Signal]) -> Result<(), SignalError>;

    /// Block until at least one signal is pending or `timeout` elapses, then drain.
    fn wait_for_signals(&mut self, timeout: Duration) -> Result<Vec<Signal>, SignalError>;

    /// Set `signals` to be ignored at the OS level.
    fn ignore(&mut self, signals: &[Signal]) -> Result<(), SignalError>;

    /// Give `signals` back their default OS disposition.
    fn restore_defaults(&mut self, signals: &[Signal]) -> Result<(), SignalError>;
}

pub struct SignalBroker {
    slot: usize,
    reader: File,
    // Kept open for the handler; its raw fd sits in `WRITE_FDS[slot]`.
    writer: OwnedFd,
    previous: Vec<(Signal, SigAction)>,
}

impl SignalBroker {
    pub fn new() -> Result<Self, SignalError> {
        let (reader, writer) = pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)?;
        let raw = writer.as_raw_fd();
        let slot = WRITE_FDS
            .iter()
            .position(|fd| {
                fd.compare_exchange(-1, raw, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            })
            .ok_or(SignalError::NoFreeSlot)?;

        ARMED[slot].store(0, Ordering::Release);
        OVERFLOW[slot].store(0, Ordering::Release);
        Ok(Self {
            slot,
            reader: File::from(reader),
            writer,
            previous: Vec::new(),
        })
    }

    fn set_disposition(&mut self, signal: Signal, handler: SigHandler) -> Result<(), SignalError> {
        if signal == Signal::Kill {
            return Err(SignalError::Unsupported(signal));
        }
        let mut flags = SaFlags::SA_RESTART;
        if signal == Signal::Chld {
            flags |= SaFlags::SA_NOCLDSTOP;
        }
        let action = SigAction::new(handler, flags, SigSet::empty());

        // SAFETY: `on_signal` only touches atomics and write(2).
        let old = unsafe { sigaction(signal.to_os(), &action) }?;
        if !self.previous.iter().any(|(s, _)| *s == signal)
            && old.handler() != SigHandler::Handler(on_signal)
        {
            self.previous.push((signal, old));
        }
        Ok(())
    }

    fn drain(&mut self) -> Vec<Signal> {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => out.extend(buf[..n].iter().filter_map(|b| Signal::from_raw(i32::from(*b)))),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }

        let overflow = OVERFLOW[self.slot].swap(0, Ordering::AcqRel);
        if overflow != 0 {
            for raw in 1..64 {
                if overflow & (1u64 << raw) != 0 {
                    if let Some(s) = Signal::from_raw(raw) {
                        out.push(s);
                    }
                }
            }
        }
        out
    }
}

impl SignalSource for SignalBroker {
    fn arm(&mut self, signals: &[Signal]) -> Result<(), SignalError> {
        for signal in signals {
            self.set_disposition(*signal, SigHandler::Handler(on_signal))?;
            ARMED[self.slot].fetch_or(bit(*signal), Ordering::AcqRel);
        }
        debug!(target: "hive.core.signals", signals = ?signals, "armed");
        Ok(())
    }

    fn wait_for_signals(&mut self, timeout: Duration) -> Result<Vec<Signal>, SignalError> {
        let timeout = PollTimeout::try_from(poll_millis(timeout)).unwrap_or(PollTimeout::MAX);
        {
            let mut fds = [PollFd::new(self.reader.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, timeout) {
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let signals = self.drain();
        if !signals.is_empty() {
            trace!(target: "hive.core.signals", signals = ?signals, "received");
        }
        Ok(signals)
    }

    fn ignore(&mut self, signals: &[Signal]) -> Result<(), SignalError> {
        for signal in signals {
            ARMED[self.slot].fetch_and(!bit(*signal), Ordering::AcqRel);
            self.set_disposition(*signal, SigHandler::SigIgn)?;
        }
        Ok(())
    }

    fn restore_defaults(&mut self, signals: &[Signal]) -> Result<(), SignalError> {
        for signal in signals {
            ARMED[self.slot].fetch_and(!bit(*signal), Ordering::AcqRel);
            self.set_disposition(*signal, SigHandler::SigDfl)?;
        }
        Ok(())
    }
}

impl Drop for SignalBroker {
    fn drop(&mut self) {
        ARMED[self.slot].store(0, Ordering::Release);
        WRITE_FDS[self.slot].store(-1, Ordering::Release);

        // Hand dispositions back unless another broker still routes them.
        for (signal, old) in self.previous.drain(..) {
            let b = bit(signal);
            let still_armed = ARMED.iter().any(|m| m.load(Ordering::Acquire) & b != 0);
            if !still_armed {
                // SAFETY: restores a disposition that was installed before ours.
                let _ = unsafe { sigaction(signal.to_os(), &old) };
            }
        }
    }
}

impl std::fmt::Debug for SignalBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalBroker")
            .field("slot", &self.slot)
            .field("write_fd", &self.writer.as_raw_fd())
            .field("armed", &ARMED[self.slot].load(Ordering::Relaxed))
            .finish()
    }
}

fn bit(signal: Signal) -> u64 {
    1u64 << (signal.as_raw() as u32 & 63)
}

/// Poll timeout in whole milliseconds, rounded up so a sub-millisecond wait still blocks.
fn poll_millis(timeout: Duration) -> i32 {
    let millis = timeout.as_micros().div_ceil(1000);
    i32::try_from(millis).unwrap_or(i32::MAX)
}

/// Raw OS handler: async-signal-safe writes only, errno preserved.
extern "C" fn on_signal(signo: std::ffi::c_int) {
    let saved = Errno::last_raw();
    let b = 1u64 << (signo as u32 & 63);
    let byte = [signo as u8];

    for slot in 0..MAX_BROKERS {
        if ARMED[slot].load(Ordering::Acquire) & b == 0 {
            continue;
        }
        let fd = WRITE_FDS[slot].load(Ordering::Acquire);
        if fd < 0 {
            continue;
        }
        // SAFETY: the owning broker clears the slot before closing the fd.
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        if !matches!(write(fd, &byte), Ok(1)) {
            OVERFLOW[slot].fetch_or(b, Ordering::AcqRel);
        }
    }

    Errno::set_raw(saved);
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{Signal as OsSignal, raise};
    use std::time::Instant;

    #[test]
    fn raised_signals_arrive_in_order() {
        let mut broker = SignalBroker::new().unwrap();
        broker.arm(&[Signal::Usr2]).unwrap();

        raise(OsSignal::SIGUSR2).unwrap();
        raise(OsSignal::SIGUSR2).unwrap();
        let got = broker.wait_for_signals(Duration::from_secs(1)).unwrap();
        assert_eq!(got, vec![Signal::Usr2, Signal::Usr2]);

        // drained: the next wait times out empty
        let got = broker.wait_for_signals(Duration::from_millis(5)).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn wait_times_out_without_signals() {
        let mut broker = SignalBroker::new().unwrap();
        let start = Instant::now();
        let got = broker.wait_for_signals(Duration::from_millis(20)).unwrap();
        assert!(got.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn sub_millisecond_waits_round_up() {
        assert_eq!(poll_millis(Duration::ZERO), 0);
        assert_eq!(poll_millis(Duration::from_micros(200)), 1);
        assert_eq!(poll_millis(Duration::from_micros(1500)), 2);
        assert_eq!(poll_millis(Duration::from_millis(100)), 100);
        assert_eq!(poll_millis(Duration::from_secs(u64::MAX)), i32::MAX);

        let mut broker = SignalBroker::new().unwrap();
        let start = Instant::now();
        assert!(broker.wait_for_signals(Duration::from_micros(200)).unwrap().is_empty());
        assert!(start.elapsed() >= Duration::from_micros(200));
    }

    #[test]
    fn overflowed_signals_are_not_lost() {
        let mut broker = SignalBroker::new().unwrap();
        OVERFLOW[broker.slot].fetch_or(bit(Signal::Hup) | bit(Signal::Term), Ordering::AcqRel);

        let got = broker.wait_for_signals(Duration::from_millis(1)).unwrap();
        assert_eq!(got.len(), 2);
        assert!(got.contains(&Signal::Hup));
        assert!(got.contains(&Signal::Term));
        assert_eq!(OVERFLOW[broker.slot].load(Ordering::Acquire), 0);
    }

    #[test]
    fn ignored_signal_is_harmless() {
        let mut broker = SignalBroker::new().unwrap();
        broker.ignore(&[Signal::Usr1]).unwrap();
        raise(OsSignal::SIGUSR1).unwrap();
        let got = broker.wait_for_signals(Duration::from_millis(1)).unwrap();
        assert!(!got.contains(&Signal::Usr1));
        broker.restore_defaults(&[Signal::Usr1]).unwrap();
    }

    #[test]
    fn kill_cannot_be_armed() {
        let mut broker = SignalBroker::new().unwrap();
        assert!(matches!(
            broker.arm(&[Signal::Kill]),
            Err(SignalError::Unsupported(Signal::Kill))
        ));
    }
}
