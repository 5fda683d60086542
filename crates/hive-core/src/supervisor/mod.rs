//! # Supervisor control loop.
//!
//! The [`Supervisor`] owns every [`WorkerPool`], the [`SignalSource`] and the map from
//! worker pid to owning pool. One thread runs the loop:
//!
//! 1. tick every pool in name order, tracking the pids they start;
//! 2. wait up to `scaling_interval` for deferred signals and dispatch them in arrival order;
//! 3. reap exited children without blocking and route each exit to its pool.
//!
//! `INT`, `TERM` and `QUIT` start the graceful shutdown (see `shutdown.rs`); `HUP` reloads
//! configuration and diffs the pools (see `reload.rs`). Any error escaping a tick or the
//! signal wait is logged and converted into the same shutdown before [`Supervisor::run`]
//! returns it.
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use tracing::{debug, error, info, warn};

use hive_model::{TaskDescriptor, TaskName};
use hive_observe::ProcTitle;

use crate::{
    broker::Broker,
    clock::{Clock, MonotonicClock},
    config::{SupervisorConfig, TaskSource},
    error::CoreError,
    launcher::Launcher,
    pool::{WorkerPool, pool_for},
    process::{ExitStatus, Pid, ProcessControl, Signal},
    signals::{SignalBroker, SignalSource},
};

mod reload;
mod shutdown;

/// Signals routed through the deferred path while running.
pub const ARMED_SIGNALS: [Signal; 5] = [
    Signal::Int,
    Signal::Term,
    Signal::Quit,
    Signal::Hup,
    Signal::Chld,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Running,
    ShuttingDown,
}

pub struct Supervisor {
    config: SupervisorConfig,
    source: Box<dyn TaskSource>,
    launcher: Box<dyn Launcher>,
    procs: Box<dyn ProcessControl>,
    signals: Box<dyn SignalSource>,
    broker: Option<Arc<dyn Broker>>,
    clock: Arc<dyn Clock>,
    title: Arc<ProcTitle>,

    task_groups: BTreeMap<TaskName, Box<dyn WorkerPool>>,
    task_pids: HashMap<Pid, TaskName>,
    state: SupervisorState,
    running: bool,
    started: bool,
}

impl Supervisor {
    pub fn builder(config: SupervisorConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(config)
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn pools(&self) -> impl Iterator<Item = &dyn WorkerPool> {
        self.task_groups.values().map(|p| p.as_ref())
    }

    pub fn pool(&self, name: &str) -> Option<&dyn WorkerPool> {
        self.task_groups.get(name).map(|p| p.as_ref())
    }

    /// Pids currently routed to a pool.
    pub fn tracked_pids(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self.task_pids.keys().copied().collect();
        pids.sort();
        pids
    }

    /// Load configuration, build pools and arm signals.
    pub fn start(&mut self) -> Result<(), CoreError> {
        if self.started {
            return Ok(());
        }
        self.title.set("prepping");

        let set = self.source.load()?;
        if let Some(rejected) = set.rejected.into_iter().next() {
            error!(target: "hive.core.supervisor", task = %rejected.name, error = %rejected.error, "invalid task configuration");
            return Err(rejected.error.into());
        }
        for descriptor in set.descriptors {
            let pool = self.make_pool(descriptor)?;
            self.task_groups.insert(pool.name().clone(), pool);
        }

        self.signals.arm(&ARMED_SIGNALS)?;
        self.started = true;
        self.running = true;
        self.state = SupervisorState::Running;
        self.title.set("waiting");
        info!(
            target: "hive.core.supervisor",
            pools = self.task_groups.len(),
            interval_ms = self.config.scaling_interval.as_millis() as u64,
            "supervisor running"
        );
        Ok(())
    }

    /// Run until shutdown. `Ok` after a signal-driven stop, `Err` after a loop error.
    pub fn run(&mut self) -> Result<(), CoreError> {
        self.start()?;
        let outcome = loop {
            if !self.running {
                break Ok(());
            }
            if let Err(e) = self.iterate() {
                error!(target: "hive.core.supervisor", kind = e.as_label(), error = %e, "control loop failed; shutting down");
                self.shutdown();
                break Err(e);
            }
        };
        self.state = SupervisorState::Stopped;
        info!(target: "hive.core.supervisor", ok = outcome.is_ok(), "supervisor stopped");
        outcome
    }

    /// One pass: tick, wait for signals, dispatch, reap.
    pub fn iterate(&mut self) -> Result<(), CoreError> {
        self.tick_pools()?;

        let signals = self.signals.wait_for_signals(self.config.scaling_interval)?;
        for signal in signals {
            self.handle(signal);
        }

        self.reap();
        Ok(())
    }

    fn tick_pools(&mut self) -> Result<(), CoreError> {
        for (name, pool) in self.task_groups.iter_mut() {
            for pid in pool.tick(self.launcher.as_mut())? {
                self.task_pids.insert(pid, name.clone());
            }
        }
        Ok(())
    }

    /// Dispatch one deferred signal.
    pub fn handle(&mut self, signal: Signal) {
        debug!(target: "hive.core.supervisor", %signal, running = self.running, "signal");
        match signal {
            s if s.is_shutdown() => {
                if self.running {
                    info!(target: "hive.core.supervisor", signal = %s, "shutdown requested");
                    self.shutdown();
                } else {
                    warn!(target: "hive.core.supervisor", signal = %s, "already stopping; killing workers");
                    self.signal_tracked(Signal::Kill);
                }
            }
            Signal::Hup if self.running => self.reload(),
            Signal::Chld => {}
            other => debug!(target: "hive.core.supervisor", signal = %other, "ignored"),
        }
    }

    /// Collect every exited child without blocking.
    pub fn reap(&mut self) {
        loop {
            match self.procs.try_reap() {
                Ok(Some((pid, status))) => self.route_exit(pid, status),
                Ok(None) => break,
                Err(e) => {
                    warn!(target: "hive.core.supervisor", error = %e, "reap failed");
                    break;
                }
            }
        }
    }

    fn route_exit(&mut self, pid: Pid, status: ExitStatus) {
        let Some(name) = self.task_pids.remove(&pid) else {
            debug!(target: "hive.core.supervisor", %pid, %status, "untracked child exited");
            return;
        };
        let Some(pool) = self.task_groups.get_mut(&name) else {
            info!(target: "hive.core.supervisor", %pid, task = %name, %status, "worker of removed pool exited");
            return;
        };
        if !self.running {
            pool.forget(pid);
            debug!(target: "hive.core.supervisor", %pid, task = %name, %status, "worker exited during shutdown");
            return;
        }

        if status.success() {
            info!(target: "hive.core.supervisor", %pid, task = %name, "worker finished");
        } else {
            warn!(target: "hive.core.supervisor", %pid, task = %name, %status, "worker failed");
        }
        if !pool.on_exit(pid, status.success()) {
            debug!(target: "hive.core.supervisor", %pid, task = %name, "exit from a replaced pool");
        }
    }

    fn make_pool(&self, descriptor: TaskDescriptor) -> Result<Box<dyn WorkerPool>, CoreError> {
        pool_for(
            descriptor,
            self.config.throttle,
            self.config.sample_size,
            self.broker.as_ref(),
            Arc::clone(&self.clock),
        )
    }
}

/// Assembles a [`Supervisor`] from its collaborators.
pub struct SupervisorBuilder {
    config: SupervisorConfig,
    source: Option<Box<dyn TaskSource>>,
    launcher: Option<Box<dyn Launcher>>,
    procs: Option<Box<dyn ProcessControl>>,
    signals: Option<Box<dyn SignalSource>>,
    broker: Option<Arc<dyn Broker>>,
    clock: Option<Arc<dyn Clock>>,
    title: Option<Arc<ProcTitle>>,
}

impl SupervisorBuilder {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            source: None,
            launcher: None,
            procs: None,
            signals: None,
            broker: None,
            clock: None,
            title: None,
        }
    }

    pub fn with_source(mut self, source: impl TaskSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_launcher(mut self, launcher: impl Launcher + 'static) -> Self {
        self.launcher = Some(Box::new(launcher));
        self
    }

    pub fn with_processes(mut self, procs: impl ProcessControl + 'static) -> Self {
        self.procs = Some(Box::new(procs));
        self
    }

    pub fn with_signals(mut self, signals: impl SignalSource + 'static) -> Self {
        self.signals = Some(Box::new(signals));
        self
    }

    pub fn with_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_title(mut self, title: Arc<ProcTitle>) -> Self {
        self.title = Some(title);
        self
    }

    /// Source, launcher and process control are required; signals default to a fresh
    /// [`SignalBroker`] and the clock to [`MonotonicClock`].
    pub fn build(self) -> Result<Supervisor, CoreError> {
        let source = self.source.ok_or(CoreError::Missing("task source"))?;
        let launcher = self.launcher.ok_or(CoreError::Missing("launcher"))?;
        let procs = self.procs.ok_or(CoreError::Missing("process control"))?;
        let signals = match self.signals {
            Some(s) => s,
            None => Box::new(SignalBroker::new()?),
        };

        Ok(Supervisor {
            config: self.config,
            source,
            launcher,
            procs,
            signals,
            broker: self.broker,
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(MonotonicClock::new())),
            title: self
                .title
                .unwrap_or_else(|| Arc::new(ProcTitle::new("hived"))),
            task_groups: BTreeMap::new(),
            task_pids: HashMap::new(),
            state: SupervisorState::Stopped,
            running: false,
            started: false,
        })
    }
}
