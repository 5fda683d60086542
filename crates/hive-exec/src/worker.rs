//! # Worker-side runtime.
//!
//! `hived work <task>` ends up here. The registered [`Task`](hive_core::Task) runs on a
//! current-thread tokio runtime while a listener turns process signals into [`Control`]
//! messages:
//!
//! - `TERM`, `INT`, `QUIT`: cancel the run and exit;
//! - `HUP`: cancel the run and start it again with a fresh token.
//!
//! A clean finish or a requested stop exits `0`; a task error exits `1`.
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::mpsc,
};
use tracing::{debug, error, info, warn};

use hive_core::{TaskError, TaskRef, WorkerContext};
use hive_model::{ENV_EXIT_ON_IDLE, ENV_QUEUE};
use hive_observe::ProcTitle;

use crate::error::{ExecError, ExecResult};

/// What the supervisor asked the worker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Stop,
    Restart,
}

/// How a worker run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// The task returned on its own.
    Finished,
    /// Stopped on request.
    Stopped,
    Failed(TaskError),
}

impl WorkerOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            WorkerOutcome::Finished | WorkerOutcome::Stopped => 0,
            WorkerOutcome::Failed(_) => 1,
        }
    }
}

/// Build the worker context from the environment the launcher exported.
pub fn context_from_env(default_queue: &str) -> WorkerContext {
    context_from_lookup(default_queue, |key| std::env::var(key).ok())
}

fn context_from_lookup(default_queue: &str, lookup: impl Fn(&str) -> Option<String>) -> WorkerContext {
    let queue = lookup(ENV_QUEUE)
        .filter(|q| !q.trim().is_empty())
        .unwrap_or_else(|| default_queue.to_string());
    let exit_on_idle = lookup(ENV_EXIT_ON_IDLE).is_some_and(|v| v == "1");
    WorkerContext::new(queue, exit_on_idle)
}

/// Run `task` until it finishes or a stop signal arrives. Blocks the calling thread.
pub fn run_worker(task: TaskRef, ctx: WorkerContext, title: &ProcTitle) -> ExecResult<WorkerOutcome> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ExecError::Runtime(e.to_string()))?;

    rt.block_on(async {
        let (tx, mut rx) = mpsc::channel(8);
        let listener = SignalListener::install()?;
        tokio::spawn(listener.forward(tx));

        title.set(&format!("task {}", task.name()));
        info!(target: "hive.exec.worker", task = task.name(), queue = %ctx.queue, exit_on_idle = ctx.exit_on_idle, "worker started");
        let outcome = supervise(task, ctx, &mut rx).await;
        match &outcome {
            WorkerOutcome::Failed(e) => {
                error!(target: "hive.exec.worker", kind = e.as_label(), error = %e, "worker failed")
            }
            other => info!(target: "hive.exec.worker", outcome = ?other, "worker exiting"),
        }
        Ok::<_, ExecError>(outcome)
    })
}

/// Drive `task` and react to `control` messages.
pub async fn supervise(
    task: TaskRef,
    mut ctx: WorkerContext,
    control: &mut mpsc::Receiver<Control>,
) -> WorkerOutcome {
    loop {
        let token = ctx.token.clone();
        let run = task.run(ctx.clone());
        tokio::pin!(run);

        let (result, request) = tokio::select! {
            res = &mut run => (res, None),
            Some(c) = control.recv() => {
                debug!(target: "hive.exec.worker", control = ?c, "cancelling run");
                token.cancel();
                (run.await, Some(c))
            }
        };

        match request {
            None => {
                return match result {
                    Ok(()) => WorkerOutcome::Finished,
                    Err(TaskError::Canceled) => WorkerOutcome::Stopped,
                    Err(e) => WorkerOutcome::Failed(e),
                };
            }
            Some(Control::Stop) => {
                return match result {
                    Ok(()) | Err(TaskError::Canceled) => WorkerOutcome::Stopped,
                    Err(e) => WorkerOutcome::Failed(e),
                };
            }
            Some(Control::Restart) => match result {
                Ok(()) | Err(TaskError::Canceled) => {
                    info!(target: "hive.exec.worker", task = task.name(), "restarting");
                    ctx = ctx.renewed();
                }
                Err(e) => return WorkerOutcome::Failed(e),
            },
        }
    }
}

/// Unix signal streams registered before the task starts, so an early `TERM` is not lost.
struct SignalListener {
    term: tokio::signal::unix::Signal,
    int: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
    hup: tokio::signal::unix::Signal,
}

impl SignalListener {
    fn install() -> ExecResult<Self> {
        Ok(Self {
            term: signal(SignalKind::terminate())?,
            int: signal(SignalKind::interrupt())?,
            quit: signal(SignalKind::quit())?,
            hup: signal(SignalKind::hangup())?,
        })
    }

    async fn forward(mut self, tx: mpsc::Sender<Control>) {
        loop {
            let control = tokio::select! {
                _ = self.term.recv() => Control::Stop,
                _ = self.int.recv() => Control::Stop,
                _ = self.quit.recv() => Control::Stop,
                _ = self.hup.recv() => Control::Restart,
            };
            if tx.send(control).await.is_err() {
                warn!(target: "hive.exec.worker", ?control, "worker gone; dropping signal");
                return;
            }
        }
    }
}
