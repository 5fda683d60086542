//! Smoke-test tasks with random job outcomes.
//!
//! Neither task talks to a broker; jobs are synthesized locally so a deployment can be
//! exercised end to end (scaling, throttling, restarts) without business logic.
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};

use hive_core::{Handler, Job, Metered, TaskError, WorkerContext};
use hive_observe::ProcTitle;

/// How a simulated job ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Hard error; the job would be rejected.
    Error,
    /// Soft failure; the job would be requeued.
    Requeue,
}

/// Outcome probabilities and pacing for one simulator flavour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Profile {
    pub error_rate: f64,
    pub requeue_rate: f64,
    /// Upper bound of the random per-job work time.
    pub max_work: Duration,
    /// Chance that the queue looks empty when a job is fetched.
    pub idle_rate: f64,
    /// Pause between fetches while the queue is empty.
    pub idle_pause: Duration,
}

impl Profile {
    pub const LONG_LIVED: Profile = Profile {
        error_rate: 0.05,
        requeue_rate: 0.05,
        max_work: Duration::from_secs(2),
        idle_rate: 0.1,
        idle_pause: Duration::from_secs(1),
    };

    pub const ONESHOT: Profile = Profile {
        error_rate: 0.10,
        requeue_rate: 0.05,
        max_work: Duration::from_millis(500),
        idle_rate: 0.0,
        idle_pause: Duration::from_secs(1),
    };

    /// Map a uniform roll in `[0, 1)` to an outcome.
    pub fn outcome(&self, roll: f64) -> Outcome {
        if roll < self.error_rate {
            Outcome::Error
        } else if roll < self.error_rate + self.requeue_rate {
            Outcome::Requeue
        } else {
            Outcome::Success
        }
    }
}

/// Per-job handler; sleeps a random while, then rolls an outcome.
pub struct Simulator {
    profile: Profile,
}

impl Simulator {
    pub fn new(profile: Profile) -> Self {
        Self { profile }
    }
}

#[async_trait]
impl Handler for Simulator {
    async fn handle(&self, job: &Job) -> Result<(), TaskError> {
        let (work, roll) = {
            let mut rng = rand::thread_rng();
            let work = rng.gen_range(0.0..=self.profile.max_work.as_secs_f64());
            (Duration::from_secs_f64(work), rng.r#gen::<f64>())
        };
        tokio::time::sleep(work).await;

        match self.profile.outcome(roll) {
            Outcome::Success => {
                debug!(target: "hive.task.simulator", routing_key = %job.routing_key, "accepted");
                Ok(())
            }
            Outcome::Error => Err(TaskError::fail(format!("simulated error in {}", job.routing_key))),
            Outcome::Requeue => Err(TaskError::fail(format!("simulated soft failure in {}", job.routing_key))),
        }
    }
}

/// Synthesizes jobs; empty with probability `idle_rate`.
struct SimulatedQueue {
    name: String,
    idle_rate: f64,
    next: u64,
}

impl SimulatedQueue {
    fn new(name: &str, idle_rate: f64) -> Self {
        Self {
            name: name.to_string(),
            idle_rate,
            next: 0,
        }
    }

    fn fetch(&mut self) -> Option<Job> {
        if rand::thread_rng().r#gen::<f64>() < self.idle_rate {
            return None;
        }
        self.next += 1;
        let key = format!("{}.{}", self.name, self.next);
        Some(Job::new(key, format!("payload {}", self.next)))
    }
}

/// Long-lived consumer: handle jobs until cancelled, or until the queue runs dry when
/// the worker was started with `exit_on_idle`.
pub async fn run_consumer(ctx: WorkerContext, profile: Profile) -> Result<(), TaskError> {
    let title = ProcTitle::new("hived");
    let handler = Metered::new(Simulator::new(profile));
    let stats = handler.stats();
    let mut queue = SimulatedQueue::new(&ctx.queue, profile.idle_rate);

    loop {
        if ctx.token.is_cancelled() {
            return Err(TaskError::Canceled);
        }
        let Some(job) = queue.fetch() else {
            if ctx.exit_on_idle {
                info!(target: "hive.task.simulator", queue = %ctx.queue, jobs = stats.processed(), "queue idle; exiting");
                return Ok(());
            }
            tokio::select! {
                _ = ctx.token.cancelled() => return Err(TaskError::Canceled),
                _ = tokio::time::sleep(profile.idle_pause) => {}
            }
            continue;
        };

        tokio::select! {
            _ = ctx.token.cancelled() => return Err(TaskError::Canceled),
            res = handler.handle(&job) => {
                if let Err(e) = res {
                    warn!(target: "hive.task.simulator", routing_key = %job.routing_key, error = %e, "job failed");
                }
            }
        }
        title.set(&format!("task simulator: {}", stats.summary()));
    }
}

/// One job, then exit; the job's failure becomes the worker's.
pub async fn run_oneshot(ctx: WorkerContext, profile: Profile) -> Result<(), TaskError> {
    let handler = Metered::new(Simulator::new(profile));
    let mut queue = SimulatedQueue::new(&ctx.queue, 0.0);
    let Some(job) = queue.fetch() else {
        return Ok(());
    };
    tokio::select! {
        _ = ctx.token.cancelled() => Err(TaskError::Canceled),
        res = handler.handle(&job) => res,
    }
}
