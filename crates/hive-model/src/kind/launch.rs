use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::TaskEnv;

/// How a worker process for a task type is started.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Launch {
    /// Re-execute the current binary as `work <task>`; the entry point comes from the task registry.
    #[default]
    Registered,
    /// Execute an external program on the host.
    Exec {
        /// Command to execute (e.g., `"/usr/bin/python3"`).
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "TaskEnv::is_empty")]
        env: TaskEnv,
        /// Working directory; inherits the supervisor's when `None`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },
}

impl Launch {
    /// Short identifier for logs: `"registered"` or `"exec"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Launch::Registered => "registered",
            Launch::Exec { .. } => "exec",
        }
    }
}
