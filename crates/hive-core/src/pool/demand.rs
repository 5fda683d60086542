use std::sync::Arc;

use tracing::{debug, info, trace};

use hive_model::TaskDescriptor;

use crate::{
    broker::{Broker, BrokerError, QueueProbe},
    clock::Clock,
    error::CoreError,
    launcher::{Launcher, StartOptions},
    pool::{PoolCore, WorkerPool},
    process::Pid,
    throttle::ThrottlePolicy,
    trend::TrendEstimator,
};

/// Mean backlog the window must exceed before growth is considered.
const MIN_MEAN_DEPTH: f64 = 1.0;

/// Grows one worker at a time while the queue backlog is non-trivial and not shrinking.
///
/// The first worker is resident; every additional one is started with `exit_on_idle`
/// so surplus capacity drains away once the queue empties.
pub struct DemandPool {
    core: PoolCore,
    trend: TrendEstimator,
    broker: Arc<dyn Broker>,
    probe: Option<Box<dyn QueueProbe>>,
}

impl DemandPool {
    pub fn new(
        descriptor: TaskDescriptor,
        policy: ThrottlePolicy,
        sample_size: usize,
        broker: Arc<dyn Broker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            trend: TrendEstimator::new(sample_size, Arc::clone(&clock)),
            core: PoolCore::new(descriptor, policy, clock),
            broker,
            probe: None,
        }
    }

    pub fn trend(&self) -> &TrendEstimator {
        &self.trend
    }

    pub fn is_connected(&self) -> bool {
        self.probe.is_some()
    }

    /// Decide whether another worker is warranted right now.
    ///
    /// An empty pool always wants its first worker. Otherwise growth stops at the local
    /// ceiling or when the broker already sees `max_workers` consumers, and happens only
    /// while the sampled backlog averages above one and is not trending down.
    pub fn needs_another_worker(&mut self) -> bool {
        if self.core.workers.is_empty() {
            return true;
        }
        let max = self.core.descriptor.max_workers;
        if self.core.workers.len() >= max {
            return false;
        }

        let queue = self.core.descriptor.queue.clone();
        match self.with_probe(|probe| probe.consumer_count(&queue)) {
            Some(consumers) if consumers >= max as u64 => {
                trace!(target: "hive.core.pool", task = %self.core.descriptor.name, consumers, "queue saturated");
                return false;
            }
            Some(_) => {}
            None => return false,
        }

        self.trend.mean() > MIN_MEAN_DEPTH && !self.trend.is_decreasing()
    }

    /// Record the current queue depth; skipped until a worker exists.
    ///
    /// Returns `false` when the broker could not be queried.
    fn sample(&mut self) -> bool {
        if self.core.workers.is_empty() {
            return true;
        }
        let queue = self.core.descriptor.queue.clone();
        match self.with_probe(|probe| probe.current_depth(&queue)) {
            Some(depth) => {
                self.trend.add_sample(depth);
                trace!(target: "hive.core.pool", task = %self.core.descriptor.name, depth, mean = self.trend.mean(), "sampled");
                true
            }
            None => false,
        }
    }

    /// Run `query` on the cached probe, connecting first if needed.
    ///
    /// Any broker error drops the probe and yields `None`; the next call reconnects.
    fn with_probe<T>(
        &mut self,
        query: impl FnOnce(&mut dyn QueueProbe) -> Result<T, BrokerError>,
    ) -> Option<T> {
        if self.probe.is_none() {
            match self.broker.connect() {
                Ok(probe) => {
                    debug!(target: "hive.core.pool", task = %self.core.descriptor.name, "broker connected");
                    self.probe = Some(probe);
                }
                Err(e) => {
                    self.on_broker_error(&e);
                    return None;
                }
            }
        }
        let probe = self.probe.as_deref_mut()?;
        match query(probe) {
            Ok(v) => Some(v),
            Err(e) => {
                self.on_broker_error(&e);
                None
            }
        }
    }

    fn on_broker_error(&mut self, error: &BrokerError) {
        info!(
            target: "hive.core.pool",
            task = %self.core.descriptor.name,
            queue = %self.core.descriptor.queue,
            kind = error.as_label(),
            %error,
            "broker unavailable; resetting connection"
        );
        self.probe = None;
    }
}

impl WorkerPool for DemandPool {
    fn core(&self) -> &PoolCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PoolCore {
        &mut self.core
    }

    fn tick(&mut self, launcher: &mut dyn Launcher) -> Result<Vec<Pid>, CoreError> {
        if !self.sample() {
            return Ok(Vec::new());
        }
        if self.core.is_throttled() {
            trace!(target: "hive.core.pool", task = %self.core.descriptor.name, "throttled");
            return Ok(Vec::new());
        }
        if !self.needs_another_worker() {
            return Ok(Vec::new());
        }

        let opts = StartOptions {
            exit_on_idle: !self.core.workers.is_empty(),
        };
        let pid = self.core.start_worker(launcher, opts)?;
        Ok(vec![pid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, testing::*};
    use hive_model::WorkModel;

    struct Fixture {
        clock: Arc<ManualClock>,
        broker: ScriptedBroker,
        launcher: FakeLauncher,
        pool: DemandPool,
    }

    fn fixture(max: usize, window: usize) -> Fixture {
        let clock = Arc::new(ManualClock::new(0.0));
        let broker = ScriptedBroker::new();
        let pool = DemandPool::new(
            descriptor("resize", WorkModel::DemandDriven, max),
            ThrottlePolicy::default(),
            window,
            Arc::new(broker.clone()),
            clock.clone(),
        );
        Fixture {
            clock,
            broker,
            launcher: FakeLauncher::new(),
            pool,
        }
    }

    impl Fixture {
        fn tick(&mut self) -> Vec<Pid> {
            let started = self.pool.tick(&mut self.launcher).unwrap();
            self.clock.advance(1.0);
            started
        }
    }

    #[test]
    fn empty_pool_always_wants_a_worker() {
        let mut f = fixture(4, 5);
        f.broker.set_consumers(100);
        f.broker.set_depth(0);
        assert!(f.pool.needs_another_worker());
        assert_eq!(f.broker.connects(), 0);
    }

    #[test]
    fn bootstrap_starts_resident_worker_without_sampling() {
        let mut f = fixture(4, 5);
        let started = f.tick();
        assert_eq!(started.len(), 1);
        assert!(f.pool.trend().is_empty());
        assert_eq!(f.broker.depth_queries(), 0);

        let starts = f.launcher.starts();
        assert!(!starts[0].1.exit_on_idle);
    }

    #[test]
    fn grows_one_worker_per_tick_up_to_ceiling() {
        let mut f = fixture(4, 5);
        f.tick();

        f.broker.set_depth(5);
        for expected in 2..=4 {
            let started = f.tick();
            assert_eq!(started.len(), 1);
            assert_eq!(f.pool.workers().len(), expected);
        }
        assert!(f.tick().is_empty());
        assert_eq!(f.pool.workers().len(), 4);

        let starts = f.launcher.starts();
        assert!(starts[1..].iter().all(|(_, opts)| opts.exit_on_idle));
    }

    #[test]
    fn shrinking_backlog_stops_growth_once_window_is_full() {
        let mut f = fixture(10, 5);
        f.tick();
        for depth in [40, 31, 30, 20] {
            f.broker.set_depth(depth);
            assert_eq!(f.tick().len(), 1);
        }
        f.broker.set_depth(11);
        assert!(f.tick().is_empty());

        assert!(f.pool.trend().is_full());
        assert!(f.pool.trend().is_decreasing());
        assert!(f.pool.trend().mean() > 1.0);
        assert!(!f.pool.needs_another_worker());
        assert_eq!(f.pool.workers().len(), 5);
    }

    #[test]
    fn idle_queue_does_not_grow() {
        let mut f = fixture(4, 3);
        f.tick();
        f.broker.set_depth(0);
        for _ in 0..5 {
            assert!(f.tick().is_empty());
        }
        assert_eq!(f.pool.workers().len(), 1);
    }

    #[test]
    fn saturated_queue_blocks_growth_despite_rising_trend() {
        let mut f = fixture(3, 5);
        f.tick();
        f.broker.set_consumers(3);
        for depth in [1, 3, 4, 6, 9, 12] {
            f.broker.set_depth(depth);
            assert!(f.tick().is_empty());
        }
        assert!(f.pool.trend().is_increasing());
        assert!(!f.pool.needs_another_worker());
    }

    #[test]
    fn local_ceiling_caps_growth() {
        let mut f = fixture(1, 3);
        f.tick();
        f.broker.set_depth(50);
        for _ in 0..5 {
            assert!(f.tick().is_empty());
        }
        assert_eq!(f.pool.workers().len(), 1);
    }

    #[test]
    fn broker_errors_reset_connection_without_penalty() {
        let mut f = fixture(4, 3);
        f.tick();
        f.broker.set_depth(3);
        f.tick();
        assert!(f.pool.is_connected());
        let samples = f.pool.trend().len();

        f.broker.fail_next(BrokerError::ChannelClosed("gone".into()));
        assert!(f.tick().is_empty());
        assert!(!f.pool.is_connected());
        assert_eq!(f.pool.trend().len(), samples);
        assert_eq!(f.pool.throttle().counter(), 0);

        f.tick();
        assert!(f.pool.is_connected());
        assert_eq!(f.broker.connects(), 2);
        assert_eq!(f.pool.trend().len(), samples + 1);
    }

    #[test]
    fn failed_connect_is_retried_next_tick() {
        let mut f = fixture(4, 3);
        f.tick();
        f.broker.refuse_connects(true);
        f.broker.set_depth(3);
        assert!(f.tick().is_empty());
        assert!(f.pool.trend().is_empty());

        f.broker.refuse_connects(false);
        f.tick();
        assert_eq!(f.pool.trend().len(), 1);
    }

    #[test]
    fn throttled_pool_keeps_sampling() {
        let mut f = fixture(4, 3);
        let first = f.tick();
        f.pool.on_exit(first[0], false);
        let second = f.tick();
        f.pool.on_exit(second[0], false);
        assert_eq!(f.tick().len(), 1);

        // ln(2) delay after two failures; 0.1s after the last start is inside it
        f.clock.set(f.clock.now() - 0.9);
        f.broker.set_depth(8);
        assert!(f.pool.is_throttled());
        assert!(f.pool.tick(&mut f.launcher).unwrap().is_empty());
        assert_eq!(f.pool.trend().len(), 1);
        assert_eq!(f.pool.workers().len(), 1);
    }
}
