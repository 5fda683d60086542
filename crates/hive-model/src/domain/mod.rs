mod kv;
pub use kv::KeyValue;

mod limits;
pub use limits::ResourceLimits;

mod task_env;
pub use task_env::TaskEnv;

mod task_name;
pub use task_name::TaskName;

/// Environment variable telling a worker it may exit once its queue is drained.
pub const ENV_EXIT_ON_IDLE: &str = "HIVE_EXIT_ON_IDLE";

/// Environment variable carrying the queue name a worker should consume.
pub const ENV_QUEUE: &str = "HIVE_QUEUE";

/// Environment variable carrying the task type name a worker runs.
pub const ENV_TASK: &str = "HIVE_TASK";
