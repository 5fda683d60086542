//! # Worker-side task abstractions.
//!
//! A [`Task`] is the entry point a worker process runs. It receives a [`WorkerContext`]
//! whose cancellation token fires when the supervisor asks the worker to stop or reload.
//! Per-message processing inside a task goes through a [`Handler`], which the
//! [`Metered`](crate::metrics::Metered) decorator can wrap for timing and counters.
use std::{borrow::Cow, future::Future, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors produced by task and handler code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The current job or run failed; the worker may keep going.
    #[error("failed: {reason}")]
    Fail { reason: String },
    /// The worker cannot continue and should exit non-zero.
    #[error("fatal: {reason}")]
    Fatal { reason: String },
    /// Stopped by cancellation.
    #[error("canceled")]
    Canceled,
}

impl TaskError {
    pub fn fail(reason: impl Into<String>) -> Self {
        TaskError::Fail {
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        TaskError::Fatal {
            reason: reason.into(),
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::Canceled => "task_canceled",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, TaskError::Fatal { .. })
    }

    /// Only plain failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Fail { .. })
    }
}

/// What a worker knows about itself.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// Fires on stop or reload.
    pub token: CancellationToken,
    /// Queue to consume.
    pub queue: String,
    /// Exit once the queue is drained.
    pub exit_on_idle: bool,
}

impl WorkerContext {
    pub fn new(queue: impl Into<String>, exit_on_idle: bool) -> Self {
        Self {
            token: CancellationToken::new(),
            queue: queue.into(),
            exit_on_idle,
        }
    }

    /// Same settings with a fresh token, used when a run is restarted.
    pub fn renewed(&self) -> Self {
        Self {
            token: CancellationToken::new(),
            queue: self.queue.clone(),
            exit_on_idle: self.exit_on_idle,
        }
    }
}

#[async_trait]
pub trait Task: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Run until the work is done, the queue is idle (when allowed), or `ctx.token` fires.
    async fn run(&self, ctx: WorkerContext) -> Result<(), TaskError>;
}

pub type TaskRef = Arc<dyn Task>;

/// Closure-backed [`Task`].
pub struct TaskFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F, Fut> TaskFn<F>
where
    F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> TaskRef {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Task for TaskFn<F>
where
    F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: WorkerContext) -> Result<(), TaskError> {
        (self.f)(ctx).await
    }
}

/// One unit of work taken from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub routing_key: String,
    pub payload: Vec<u8>,
}

impl Job {
    pub fn new(routing_key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload: payload.into(),
        }
    }
}

/// Processes one job at a time.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), TaskError>;
}
