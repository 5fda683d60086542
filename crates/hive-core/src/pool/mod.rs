//! # Worker pools.
//!
//! One pool per configured task type. A pool owns the set of live worker pids, a private
//! [`Throttle`] and the time of its last worker start. Two policies decide how many workers
//! a pool wants:
//! - [`SteadyPool`] keeps `max_workers` copies running;
//! - [`DemandPool`] grows one worker at a time while the queue backlog justifies it.
//!
//! Pools never signal or reap on their own; the supervisor passes its [`ProcessControl`]
//! and [`Launcher`] in on every call.
use std::{collections::BTreeSet, sync::Arc};

use tracing::{debug, info, warn};

use hive_model::{TaskDescriptor, TaskName, WorkModel};

use crate::{
    broker::Broker,
    clock::Clock,
    error::CoreError,
    launcher::{Launcher, StartOptions},
    process::{Pid, ProcessControl, ProcessError, Signal},
    throttle::{Throttle, ThrottlePolicy},
};

mod demand;
mod steady;

pub use demand::DemandPool;
pub use steady::SteadyPool;

/// State shared by both policies.
pub struct PoolCore {
    descriptor: TaskDescriptor,
    workers: BTreeSet<Pid>,
    throttle: Throttle,
    last_start: Option<f64>,
    clock: Arc<dyn Clock>,
}

impl PoolCore {
    pub fn new(descriptor: TaskDescriptor, policy: ThrottlePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            descriptor,
            workers: BTreeSet::new(),
            throttle: Throttle::new(policy),
            last_start: None,
            clock,
        }
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// True while the throttle delay since the last start has not elapsed.
    pub fn is_throttled(&self) -> bool {
        match self.last_start {
            Some(last) => self.throttle.is_throttled(self.now(), last),
            None => false,
        }
    }

    /// Start one worker and track it.
    fn start_worker(
        &mut self,
        launcher: &mut dyn Launcher,
        opts: StartOptions,
    ) -> Result<Pid, CoreError> {
        let pid = launcher
            .start(&self.descriptor, opts)
            .map_err(|source| CoreError::Launch {
                task: self.descriptor.name.to_string(),
                source,
            })?;
        self.workers.insert(pid);
        self.last_start = Some(self.now());
        info!(
            target: "hive.core.pool",
            task = %self.descriptor.name,
            %pid,
            exit_on_idle = opts.exit_on_idle,
            workers = self.workers.len(),
            "worker started"
        );
        Ok(pid)
    }

    fn signal(&self, pid: Pid, signal: Signal, procs: &dyn ProcessControl) {
        match procs.signal(pid, signal) {
            Ok(()) => {}
            Err(ProcessError::NoSuchProcess(_)) => {
                debug!(target: "hive.core.pool", %pid, %signal, "worker already gone");
            }
            Err(e) => {
                warn!(target: "hive.core.pool", %pid, %signal, error = %e, "signal delivery failed");
            }
        }
    }
}

/// Scaling policy for one task type.
pub trait WorkerPool: Send {
    fn core(&self) -> &PoolCore;
    fn core_mut(&mut self) -> &mut PoolCore;

    /// Start whatever workers the policy wants right now; returns the new pids.
    fn tick(&mut self, launcher: &mut dyn Launcher) -> Result<Vec<Pid>, CoreError>;

    fn descriptor(&self) -> &TaskDescriptor {
        &self.core().descriptor
    }

    fn name(&self) -> &TaskName {
        &self.core().descriptor.name
    }

    fn workers(&self) -> &BTreeSet<Pid> {
        &self.core().workers
    }

    fn throttle(&self) -> &Throttle {
        &self.core().throttle
    }

    fn is_throttled(&self) -> bool {
        self.core().is_throttled()
    }

    /// Record a worker exit. Returns `false` for pids this pool does not own, which leaves the throttle untouched.
    fn on_exit(&mut self, pid: Pid, success: bool) -> bool {
        let core = self.core_mut();
        if !core.workers.remove(&pid) {
            return false;
        }
        core.throttle.adjust(success);
        debug!(
            target: "hive.core.pool",
            task = %core.descriptor.name,
            %pid,
            success,
            throttle = core.throttle.counter(),
            "worker exited"
        );
        true
    }

    /// Drop `pid` from the worker set without touching the throttle.
    fn forget(&mut self, pid: Pid) -> bool {
        self.core_mut().workers.remove(&pid)
    }

    /// Take a new descriptor for the same pool, e.g. a changed `max_workers`.
    fn reconfigure(&mut self, descriptor: TaskDescriptor) {
        let core = self.core_mut();
        if core.descriptor.max_workers != descriptor.max_workers {
            info!(
                target: "hive.core.pool",
                task = %descriptor.name,
                from = core.descriptor.max_workers,
                to = descriptor.max_workers,
                "max workers changed"
            );
        }
        core.descriptor = descriptor;
    }

    fn signal_all(&self, signal: Signal, procs: &dyn ProcessControl) {
        let core = self.core();
        for pid in &core.workers {
            core.signal(*pid, signal, procs);
        }
    }

    /// Ask one worker to stop.
    fn stop_worker(&self, procs: &dyn ProcessControl) -> Option<Pid> {
        let core = self.core();
        let pid = core.workers.iter().next_back().copied()?;
        core.signal(pid, Signal::Term, procs);
        Some(pid)
    }

    fn stop_all_workers(&self, procs: &dyn ProcessControl) {
        self.signal_all(Signal::Term, procs);
    }

    /// HUP every worker so it reloads and keeps going.
    fn restart_workers(&self, procs: &dyn ProcessControl) {
        self.signal_all(Signal::Hup, procs);
    }
}

/// Build the pool matching `descriptor.work_model`.
pub fn pool_for(
    descriptor: TaskDescriptor,
    policy: ThrottlePolicy,
    sample_size: usize,
    broker: Option<&Arc<dyn Broker>>,
    clock: Arc<dyn Clock>,
) -> Result<Box<dyn WorkerPool>, CoreError> {
    match descriptor.work_model {
        WorkModel::Steady => Ok(Box::new(SteadyPool::new(descriptor, policy, clock))),
        WorkModel::DemandDriven => {
            let broker = broker
                .cloned()
                .ok_or_else(|| CoreError::BrokerRequired(descriptor.name.to_string()))?;
            Ok(Box::new(DemandPool::new(
                descriptor,
                policy,
                sample_size,
                broker,
                clock,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        testing::{FakeLauncher, FakeProcesses, ScriptedBroker, descriptor},
    };

    #[test]
    fn pool_for_picks_policy_by_work_model() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let broker: Arc<dyn Broker> = Arc::new(ScriptedBroker::new());

        let steady = descriptor("a", WorkModel::Steady, 2);
        assert!(pool_for(steady, ThrottlePolicy::default(), 10, None, clock.clone()).is_ok());

        let demand = descriptor("b", WorkModel::DemandDriven, 2);
        assert!(matches!(
            pool_for(demand.clone(), ThrottlePolicy::default(), 10, None, clock.clone()),
            Err(CoreError::BrokerRequired(name)) if name == "b"
        ));
        assert!(pool_for(demand, ThrottlePolicy::default(), 10, Some(&broker), clock).is_ok());
    }

    #[test]
    fn on_exit_ignores_foreign_pids() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let mut pool = SteadyPool::new(
            descriptor("a", WorkModel::Steady, 1),
            ThrottlePolicy::default(),
            clock,
        );
        let mut launcher = FakeLauncher::new();
        let started = pool.tick(&mut launcher).unwrap();
        assert_eq!(started.len(), 1);

        assert!(!pool.on_exit(Pid::from_raw(99_999), false));
        assert_eq!(pool.throttle().counter(), 0);

        assert!(pool.on_exit(started[0], false));
        assert_eq!(pool.throttle().counter(), 1);
        assert!(pool.workers().is_empty());
    }

    #[test]
    fn signal_helpers_reach_every_worker() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let mut pool = SteadyPool::new(
            descriptor("a", WorkModel::Steady, 3),
            ThrottlePolicy::default(),
            clock,
        );
        let mut launcher = FakeLauncher::new();
        let started = pool.tick(&mut launcher).unwrap();
        let procs = FakeProcesses::new();

        pool.restart_workers(&procs);
        pool.stop_all_workers(&procs);
        let stopped = pool.stop_worker(&procs).unwrap();

        assert_eq!(procs.sent_to_all(&started, Signal::Hup), 3);
        assert_eq!(procs.sent_to_all(&started, Signal::Term), 3);
        assert_eq!(procs.count(stopped, Signal::Term), 2);
    }

    #[test]
    fn vanished_workers_do_not_break_signalling() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let mut pool = SteadyPool::new(
            descriptor("a", WorkModel::Steady, 2),
            ThrottlePolicy::default(),
            clock,
        );
        let mut launcher = FakeLauncher::new();
        let started = pool.tick(&mut launcher).unwrap();
        let procs = FakeProcesses::new();
        procs.mark_gone(started[0]);

        pool.stop_all_workers(&procs);
        assert_eq!(procs.count(started[1], Signal::Term), 1);
    }
}
