//! Human-readable process title.
//!
//! Operators spot supervisor and worker phases in `ps`/`top` output.
//! On Linux the title is published through `prctl(PR_SET_NAME)`, which the kernel truncates to 15 bytes;
//! elsewhere only the in-process copy is kept and logged at `trace`.
use std::sync::Mutex;

use tracing::trace;

/// Kernel limit for the thread name, excluding the trailing NUL.
const COMM_LEN: usize = 15;

#[derive(Debug)]
pub struct ProcTitle {
    prefix: String,
    current: Mutex<String>,
}

impl ProcTitle {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            current: Mutex::new(prefix.clone()),
            prefix,
        }
    }

    /// Publish `phase`, e.g. `"waiting"` or `"task mailer"`.
    pub fn set(&self, phase: &str) {
        let title = if phase.is_empty() {
            self.prefix.clone()
        } else {
            format!("{} {}", self.prefix, phase)
        };
        trace!(target: "hive.observe.title", %title, "process title");
        publish(&title);
        if let Ok(mut current) = self.current.lock() {
            *current = title;
        }
    }

    pub fn current(&self) -> String {
        self.current
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }
}

/// Cut `title` at a char boundary so it fits the kernel buffer.
fn truncated(title: &str) -> &str {
    if title.len() <= COMM_LEN {
        return title;
    }
    let mut end = COMM_LEN;
    while !title.is_char_boundary(end) {
        end -= 1;
    }
    &title[..end]
}

#[cfg(target_os = "linux")]
fn publish(title: &str) {
    let Ok(name) = std::ffi::CString::new(truncated(title)) else {
        return;
    };
    // Failure only leaves the previous name in place.
    let _ = nix::sys::prctl::set_name(&name);
}

#[cfg(not(target_os = "linux"))]
fn publish(title: &str) {
    let _ = truncated(title);
}
