use serde::{Deserialize, Serialize};

/// `rlimit` values applied to every worker process before exec.
///
/// `None` leaves the inherited limit in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceLimits {
    /// `RLIMIT_NOFILE`.
    pub max_open_files: Option<u64>,
    /// `RLIMIT_FSIZE`; exceeding it delivers `SIGXFSZ` to the worker.
    pub max_file_size_bytes: Option<u64>,
    /// Set `RLIMIT_CORE` to zero.
    pub disable_core_dumps: bool,
}

impl ResourceLimits {
    /// Returns `true` if no explicit limits are configured.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.max_open_files.is_none()
            && self.max_file_size_bytes.is_none()
            && !self.disable_core_dumps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_empty() {
        assert!(ResourceLimits::default().is_empty());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let limits: ResourceLimits = serde_json::from_str(r#"{"max_open_files": 1024}"#).unwrap();
        assert_eq!(limits.max_open_files, Some(1024));
        assert!(!limits.disable_core_dumps);
        assert!(!limits.is_empty());
    }

    #[test]
    fn unknown_field_rejected() {
        assert!(serde_json::from_str::<ResourceLimits>(r#"{"max_procs": 4}"#).is_err());
    }
}
