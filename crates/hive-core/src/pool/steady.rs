use std::sync::Arc;

use tracing::trace;

use hive_model::TaskDescriptor;

use crate::{
    clock::Clock,
    error::CoreError,
    launcher::{Launcher, StartOptions},
    pool::{PoolCore, WorkerPool},
    process::Pid,
    throttle::ThrottlePolicy,
};

/// Keeps `max_workers` copies of a task running.
pub struct SteadyPool {
    core: PoolCore,
}

impl SteadyPool {
    pub fn new(descriptor: TaskDescriptor, policy: ThrottlePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            core: PoolCore::new(descriptor, policy, clock),
        }
    }

    /// Workers short of the ceiling.
    pub fn missing(&self) -> usize {
        self.core
            .descriptor
            .max_workers
            .saturating_sub(self.core.workers.len())
    }
}

impl WorkerPool for SteadyPool {
    fn core(&self) -> &PoolCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PoolCore {
        &mut self.core
    }

    fn tick(&mut self, launcher: &mut dyn Launcher) -> Result<Vec<Pid>, CoreError> {
        let missing = self.missing();
        if missing == 0 {
            return Ok(Vec::new());
        }
        if self.core.is_throttled() {
            trace!(target: "hive.core.pool", task = %self.core.descriptor.name, missing, "throttled");
            return Ok(Vec::new());
        }

        let mut started = Vec::with_capacity(missing);
        for _ in 0..missing {
            started.push(self.core.start_worker(launcher, StartOptions::default())?);
        }
        Ok(started)
    }
}
