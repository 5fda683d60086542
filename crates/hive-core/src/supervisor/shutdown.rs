use tracing::{info, warn};

use crate::{
    pool::WorkerPool,
    process::{ProcessError, Signal},
    supervisor::{Supervisor, SupervisorState},
};

/// Stop signals ignored once teardown has begun; `CHLD` stays armed for reaping.
const IGNORED_WHILE_STOPPING: [Signal; 4] = [Signal::Int, Signal::Term, Signal::Quit, Signal::Hup];

impl Supervisor {
    /// Graceful teardown: `TERM` everyone, retry for the configured rounds, then `KILL`.
    ///
    /// Never blocks beyond `rounds × 2 × pause`; survivors of the final `KILL` are left to the OS.
    pub(crate) fn shutdown(&mut self) {
        if self.state != SupervisorState::Running {
            return;
        }
        self.running = false;
        self.state = SupervisorState::ShuttingDown;
        self.title.set("stopping");

        if let Err(e) = self.signals.ignore(&IGNORED_WHILE_STOPPING) {
            warn!(target: "hive.core.supervisor", error = %e, "could not ignore stop signals");
        }
        self.adopt_pool_workers();

        let policy = self.config.shutdown;
        let sent = self.signal_tracked(Signal::Term);
        info!(target: "hive.core.supervisor", workers = sent, "stopping workers");

        for round in 1..=policy.rounds {
            self.reap();
            if self.task_pids.is_empty() {
                info!(target: "hive.core.supervisor", round, "all workers stopped");
                self.state = SupervisorState::Stopped;
                return;
            }
            self.clock.sleep(policy.pause);
            self.signal_tracked(Signal::Term);
            self.clock.sleep(policy.pause);
        }

        self.reap();
        if !self.task_pids.is_empty() {
            warn!(
                target: "hive.core.supervisor",
                remaining = self.task_pids.len(),
                "workers ignored TERM; sending KILL"
            );
            self.signal_tracked(Signal::Kill);
            self.reap();
        }
        self.state = SupervisorState::Stopped;
    }

    /// Send `signal` to every tracked pid; returns how many deliveries succeeded.
    pub(crate) fn signal_tracked(&self, signal: Signal) -> usize {
        let mut delivered = 0;
        for pid in self.tracked_pids() {
            match self.procs.signal(pid, signal) {
                Ok(()) => delivered += 1,
                Err(ProcessError::NoSuchProcess(_)) => {}
                Err(e) => {
                    warn!(target: "hive.core.supervisor", %pid, %signal, error = %e, "signal delivery failed")
                }
            }
        }
        delivered
    }

    /// Make sure every pool-owned pid is routed, including ones started by a tick that later failed.
    fn adopt_pool_workers(&mut self) {
        for (name, pool) in &self.task_groups {
            for pid in pool.workers() {
                self.task_pids.entry(*pid).or_insert_with(|| name.clone());
            }
        }
    }
}
