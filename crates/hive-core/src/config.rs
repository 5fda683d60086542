//! # Supervisor configuration.
//!
//! Two layers live here:
//! - [`SupervisorConfig`]: the tuning knobs of the control loop, with defaults.
//! - [`ConfigFile`]: the YAML document operators write, plus [`FileTaskSource`] which
//!   re-reads it on every reload and resolves task entries against the [`TaskRegistry`].
//!
//! ```yaml
//! supervisor:
//!   scaling_interval: 0.1
//!   throttle_max: 16
//! broker:
//!   url: http://localhost:15672
//! limits:
//!   max_open_files: 4096
//! tasks:
//!   mailer: 2
//!   resize: { max_workers: 4, queue: images }
//!   report:
//!     max_workers: 1
//!     work_model: steady
//!     command: /usr/local/bin/report
//! ```
//!
//! `tasks` may also be a plain list of names; a name listed `n` times gets `max_workers = n`.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use hive_model::{Launch, ModelError, ResourceLimits, TaskDescriptor, TaskEnv, TaskName, WorkModel};
use hive_observe::LoggerConfig;

use crate::{registry::TaskRegistry, throttle::ThrottlePolicy};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "HIVE_CONFIG";

/// Config file used when neither flag nor environment names one.
pub const DEFAULT_CONFIG_PATH: &str = "etc/config.yml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(String),
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("unknown task type: {0}")]
    UnknownTask(String),
    #[error("task {name}: {reason}")]
    InvalidTask { name: String, reason: String },
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// How long and how hard shutdown tries before escalating to `KILL`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShutdownPolicy {
    /// Rounds of reap, pause, re-`TERM`, pause.
    pub rounds: u32,
    pub pause: Duration,
}

impl Default for ShutdownPolicy {
    /// Returns `rounds = 3`, `pause = 1s`.
    fn default() -> Self {
        Self {
            rounds: 3,
            pause: Duration::from_secs(1),
        }
    }
}

/// Control loop settings.
#[derive(Clone, Debug, PartialEq)]
pub struct SupervisorConfig {
    /// Upper bound on how long the loop waits for signals between ticks.
    pub scaling_interval: Duration,
    pub throttle: ThrottlePolicy,
    /// Trend window length for demand-driven pools.
    pub sample_size: usize,
    pub shutdown: ShutdownPolicy,
}

impl Default for SupervisorConfig {
    /// Returns:
    /// - `scaling_interval = 100ms`;
    /// - `throttle = { max: 16, factor: 1.0 }`;
    /// - `sample_size = 100`;
    /// - `shutdown = { rounds: 3, pause: 1s }`.
    fn default() -> Self {
        Self {
            scaling_interval: Duration::from_millis(100),
            throttle: ThrottlePolicy::default(),
            sample_size: 100,
            shutdown: ShutdownPolicy::default(),
        }
    }
}

/// `supervisor:` section; seconds are floats.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorSection {
    pub scaling_interval: f64,
    pub throttle_max: u32,
    pub throttle_factor: f64,
    pub sample_size: usize,
    pub shutdown_rounds: u32,
    pub shutdown_pause: f64,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        let d = SupervisorConfig::default();
        Self {
            scaling_interval: d.scaling_interval.as_secs_f64(),
            throttle_max: d.throttle.max,
            throttle_factor: d.throttle.factor,
            sample_size: d.sample_size,
            shutdown_rounds: d.shutdown.rounds,
            shutdown_pause: d.shutdown.pause.as_secs_f64(),
        }
    }
}

impl SupervisorSection {
    pub fn to_config(&self) -> Result<SupervisorConfig, ConfigError> {
        Ok(SupervisorConfig {
            scaling_interval: positive_secs("scaling_interval", self.scaling_interval)?,
            throttle: ThrottlePolicy {
                max: self.throttle_max,
                factor: non_negative("throttle_factor", self.throttle_factor)?,
            },
            sample_size: match self.sample_size {
                0 | 1 | 2 => {
                    return Err(ConfigError::Invalid {
                        field: "sample_size",
                        reason: "must be at least 3".into(),
                    });
                }
                n => n,
            },
            shutdown: ShutdownPolicy {
                rounds: self.shutdown_rounds,
                pause: secs("shutdown_pause", self.shutdown_pause)?,
            },
        })
    }
}

fn non_negative(field: &'static str, v: f64) -> Result<f64, ConfigError> {
    if v.is_finite() && v >= 0.0 {
        Ok(v)
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{v} is not a non-negative number"),
        })
    }
}

/// Seconds as a [`Duration`]; negative, non-finite and out-of-range values are rejected.
fn secs(field: &'static str, v: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(v).map_err(|e| ConfigError::Invalid {
        field,
        reason: format!("{v} seconds: {e}"),
    })
}

fn positive_secs(field: &'static str, v: f64) -> Result<Duration, ConfigError> {
    match secs(field, v)? {
        d if d.is_zero() => Err(ConfigError::Invalid {
            field,
            reason: format!("{v} must be greater than zero"),
        }),
        d => Ok(d),
    }
}

/// `broker:` section: RabbitMQ management API used for depth queries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerSettings {
    /// Base URL of the management API, e.g. `http://localhost:15672`.
    pub url: String,
    pub vhost: String,
    pub username: String,
    pub password: String,
    /// Per-request timeout in seconds.
    pub timeout: f64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:15672".to_string(),
            vhost: "/".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            timeout: 2.0,
        }
    }
}

impl BrokerSettings {
    /// Request timeout, at least one millisecond.
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        Ok(secs("timeout", self.timeout)?.max(Duration::from_millis(1)))
    }
}

/// One entry under `tasks:` in map form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TaskEntry {
    Max(usize),
    Full(TaskEntrySpec),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskEntrySpec {
    pub max_workers: Option<usize>,
    pub queue: Option<String>,
    pub work_model: Option<WorkModel>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: TaskEnv,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TasksSection {
    List(Vec<String>),
    Map(BTreeMap<String, TaskEntry>),
}

impl Default for TasksSection {
    fn default() -> Self {
        TasksSection::Map(BTreeMap::new())
    }
}

impl TasksSection {
    /// Normalize both forms into `(name, entry)` pairs in name order.
    fn entries(&self) -> Vec<(String, TaskEntrySpec)> {
        match self {
            TasksSection::List(names) => {
                let mut counts: BTreeMap<String, usize> = BTreeMap::new();
                for name in names {
                    *counts.entry(name.trim().to_string()).or_default() += 1;
                }
                counts
                    .into_iter()
                    .map(|(name, n)| {
                        let spec = TaskEntrySpec {
                            max_workers: Some(n),
                            ..TaskEntrySpec::default()
                        };
                        (name, spec)
                    })
                    .collect()
            }
            TasksSection::Map(map) => map
                .iter()
                .map(|(name, entry)| {
                    let spec = match entry {
                        TaskEntry::Max(n) => TaskEntrySpec {
                            max_workers: Some(*n),
                            ..TaskEntrySpec::default()
                        },
                        TaskEntry::Full(spec) => spec.clone(),
                    };
                    (name.clone(), spec)
                })
                .collect(),
        }
    }
}

/// The whole config document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub supervisor: SupervisorSection,
    pub broker: Option<BrokerSettings>,
    pub logging: Option<LoggerConfig>,
    /// Applied to every worker the launcher spawns.
    pub limits: ResourceLimits,
    pub tasks: TasksSection,
}

impl ConfigFile {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Resolve every task entry; bad entries are rejected one by one.
    pub fn resolve_tasks(&self, registry: &TaskRegistry) -> TaskSet {
        let mut set = TaskSet::default();
        for (name, spec) in self.tasks.entries() {
            match resolve_entry(&name, &spec, registry) {
                Ok(d) => set.descriptors.push(d),
                Err(error) => set.rejected.push(Rejected { name, error }),
            }
        }
        set
    }
}

fn resolve_entry(
    raw_name: &str,
    spec: &TaskEntrySpec,
    registry: &TaskRegistry,
) -> Result<TaskDescriptor, ConfigError> {
    let name = TaskName::new(raw_name)?;
    let max_workers = spec.max_workers.unwrap_or(1);

    let descriptor = match &spec.command {
        Some(command) => {
            let work_model = spec.work_model.ok_or_else(|| ConfigError::InvalidTask {
                name: name.to_string(),
                reason: "external commands must declare work_model".into(),
            })?;
            if command.trim().is_empty() {
                return Err(ConfigError::InvalidTask {
                    name: name.to_string(),
                    reason: "command is empty".into(),
                });
            }
            let queue = spec.queue.clone().unwrap_or_else(|| name.default_queue());
            TaskDescriptor::new(name, work_model, max_workers)
                .with_queue(queue)
                .with_launch(Launch::Exec {
                    command: command.clone(),
                    args: spec.args.clone(),
                    env: spec.env.clone(),
                    cwd: spec.cwd.clone(),
                })
        }
        None => {
            let task_type = registry
                .get(name.as_str())
                .ok_or_else(|| ConfigError::UnknownTask(name.to_string()))?;
            if let Some(model) = spec.work_model
                && model != task_type.work_model
            {
                return Err(ConfigError::InvalidTask {
                    name: name.to_string(),
                    reason: format!(
                        "registered as {}, config says {model}",
                        task_type.work_model
                    ),
                });
            }
            let queue = spec.queue.clone().unwrap_or_else(|| task_type.queue.clone());
            TaskDescriptor::new(name, task_type.work_model, max_workers).with_queue(queue)
        }
    };
    descriptor.validate()?;
    Ok(descriptor)
}

/// A task entry that could not be turned into a descriptor.
#[derive(Debug)]
pub struct Rejected {
    pub name: String,
    pub error: ConfigError,
}

/// Result of one configuration read.
#[derive(Debug, Default)]
pub struct TaskSet {
    pub descriptors: Vec<TaskDescriptor>,
    pub rejected: Vec<Rejected>,
}

impl TaskSet {
    pub fn is_rejected(&self, name: &TaskName) -> bool {
        self.rejected.iter().any(|r| r.name.trim() == name.as_str())
    }
}

/// Supplies the current task descriptors; read at startup and on every reload.
pub trait TaskSource: Send {
    fn load(&self) -> Result<TaskSet, ConfigError>;
}

/// Re-reads a YAML config file on every [`TaskSource::load`].
pub struct FileTaskSource {
    path: PathBuf,
    registry: Arc<TaskRegistry>,
}

impl FileTaskSource {
    pub fn new(path: impl Into<PathBuf>, registry: Arc<TaskRegistry>) -> Self {
        Self {
            path: path.into(),
            registry,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TaskSource for FileTaskSource {
    fn load(&self) -> Result<TaskSet, ConfigError> {
        let file = ConfigFile::load(&self.path)?;
        let set = file.resolve_tasks(&self.registry);
        debug!(
            target: "hive.core.config",
            path = %self.path.display(),
            tasks = set.descriptors.len(),
            rejected = set.rejected.len(),
            "config loaded"
        );
        Ok(set)
    }
}

/// Pick the config path: explicit flag, then `HIVE_CONFIG`, then the default.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    match std::env::var_os(CONFIG_ENV) {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => PathBuf::from(DEFAULT_CONFIG_PATH),
    }
}
