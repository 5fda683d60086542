//! Job counters and timing as an explicit [`Handler`] decorator.
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tracing::debug;

use crate::task::{Handler, Job, TaskError};

/// Counters shared between a [`Metered`] handler and whoever reports them.
#[derive(Debug)]
pub struct JobStats {
    started: Instant,
    processed: AtomicU64,
    failed: AtomicU64,
    busy_nanos: AtomicU64,
}

impl JobStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            busy_nanos: AtomicU64::new(0),
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Total time spent inside the wrapped handler.
    pub fn busy(&self) -> Duration {
        Duration::from_nanos(self.busy_nanos.load(Ordering::Relaxed))
    }

    /// Jobs per second since the stats were created.
    pub fn rate(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.processed() as f64 / elapsed
    }

    /// `"<n> jobs, <rate>/sec"`, used in the worker's process title.
    pub fn summary(&self) -> String {
        format!("{} jobs, {:.1}/sec", self.processed(), self.rate())
    }

    fn record(&self, elapsed: Duration, ok: bool) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.busy_nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}

impl Default for JobStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a handler, counting and timing every job it handles.
pub struct Metered<H> {
    inner: H,
    stats: Arc<JobStats>,
}

impl<H: Handler> Metered<H> {
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            stats: Arc::new(JobStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<JobStats> {
        Arc::clone(&self.stats)
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<H: Handler> Handler for Metered<H> {
    async fn handle(&self, job: &Job) -> Result<(), TaskError> {
        let start = Instant::now();
        let res = self.inner.handle(job).await;
        let elapsed = start.elapsed();
        self.stats.record(elapsed, res.is_ok());
        debug!(
            target: "hive.core.metrics",
            routing_key = %job.routing_key,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            ok = res.is_ok(),
            "job handled"
        );
        res
    }
}
