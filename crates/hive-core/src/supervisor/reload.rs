use std::collections::BTreeMap;

use tracing::{error, info};

use hive_model::{TaskDescriptor, TaskName};

use crate::{pool::WorkerPool, supervisor::Supervisor};

impl Supervisor {
    /// Re-read configuration and reconcile pools by task name.
    ///
    /// - in both: keep the pool, take the new ceiling, `HUP` its workers;
    /// - only in the new set: create an empty pool;
    /// - only in the old set: `TERM` the workers and drop the pool.
    ///
    /// A rejected entry leaves the pool of the same name untouched; a failed read leaves everything untouched.
    pub(crate) fn reload(&mut self) {
        self.title.set("prepping");
        info!(target: "hive.core.supervisor", "reloading configuration");

        let mut set = match self.source.load() {
            Ok(set) => set,
            Err(e) => {
                error!(target: "hive.core.supervisor", error = %e, "reload failed; keeping current pools");
                self.title.set("waiting");
                return;
            }
        };

        for r in &set.rejected {
            error!(target: "hive.core.supervisor", task = %r.name, error = %r.error, "task rejected on reload");
        }
        let mut incoming: BTreeMap<TaskName, TaskDescriptor> = std::mem::take(&mut set.descriptors)
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();

        let current: Vec<TaskName> = self.task_groups.keys().cloned().collect();
        for name in current {
            match incoming.remove(&name) {
                Some(descriptor) => self.update_pool(name, descriptor),
                None if set.is_rejected(&name) => {
                    info!(target: "hive.core.supervisor", task = %name, "keeping pool of rejected task");
                }
                None => self.teardown_pool(&name),
            }
        }

        for (name, descriptor) in incoming {
            match self.make_pool(descriptor) {
                Ok(pool) => {
                    info!(target: "hive.core.supervisor", task = %name, "pool created");
                    self.task_groups.insert(name, pool);
                }
                Err(e) => {
                    error!(target: "hive.core.supervisor", task = %name, error = %e, "cannot create pool");
                }
            }
        }

        self.title.set("waiting");
    }

    fn update_pool(&mut self, name: TaskName, descriptor: TaskDescriptor) {
        let Some(pool) = self.task_groups.get_mut(&name) else {
            return;
        };
        if pool.descriptor().same_pool_as(&descriptor) {
            pool.reconfigure(descriptor);
            pool.restart_workers(self.procs.as_ref());
            info!(target: "hive.core.supervisor", task = %name, workers = pool.workers().len(), "pool restarted");
            return;
        }

        // Same name, different queue, work model or launch: replace the pool.
        match self.make_pool(descriptor) {
            Ok(fresh) => {
                self.teardown_pool(&name);
                self.task_groups.insert(name.clone(), fresh);
                info!(target: "hive.core.supervisor", task = %name, "pool replaced");
            }
            Err(e) => {
                error!(target: "hive.core.supervisor", task = %name, error = %e, "cannot replace pool; keeping the old one");
            }
        }
    }

    fn teardown_pool(&mut self, name: &TaskName) {
        if let Some(pool) = self.task_groups.remove(name) {
            pool.stop_all_workers(self.procs.as_ref());
            info!(target: "hive.core.supervisor", task = %name, workers = pool.workers().len(), "pool removed");
        }
    }
}
