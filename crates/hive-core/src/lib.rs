pub mod error;
pub use error::CoreError;

pub mod clock;
pub use clock::{Clock, ManualClock, MonotonicClock};

pub mod throttle;
pub use throttle::{Throttle, ThrottlePolicy};

pub mod trend;
pub use trend::TrendEstimator;

pub mod broker;
pub use broker::{Broker, BrokerError, QueueProbe};

pub mod process;
pub use process::{ExitStatus, Pid, ProcessControl, ProcessError, Signal};

pub mod launcher;
pub use launcher::{LaunchError, Launcher, StartOptions};

pub mod pool;
pub use pool::{DemandPool, SteadyPool, WorkerPool};

pub mod signals;
pub use signals::{SignalBroker, SignalError, SignalSource};

pub mod config;
pub use config::{
    BrokerSettings, ConfigError, ConfigFile, FileTaskSource, ShutdownPolicy, SupervisorConfig,
    TaskSet, TaskSource,
};

pub mod registry;
pub use registry::{TaskRegistry, TaskType};

pub mod task;
pub use task::{Job, Handler, Task, TaskError, TaskFn, TaskRef, WorkerContext};

pub mod metrics;
pub use metrics::{JobStats, Metered};

pub mod supervisor;
pub use supervisor::{Supervisor, SupervisorBuilder, SupervisorState};

#[cfg(test)]
pub(crate) mod testing;
