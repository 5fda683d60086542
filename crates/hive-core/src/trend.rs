//! # Queue depth trend estimation.
//!
//! [`TrendEstimator`] keeps the last `sample_size` `(timestamp, depth)` samples and answers
//! whether depth is significantly rising or falling over that window.
//!
//! Significance is the ordinary-least-squares slope divided by its standard error. A score
//! above [`SIGNIFICANCE`] counts as increasing, below its negation as decreasing. Until the
//! window is full there is no opinion and both predicates return `false`.
use std::{collections::VecDeque, sync::Arc};

use crate::clock::Clock;

/// Score threshold separating a trend from sampling noise.
pub const SIGNIFICANCE: f64 = 3.0;

/// Standard errors at or below this are treated as "no trend".
const MIN_STDERR: f64 = 1e-12;

/// One observed queue depth.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub at: f64,
    pub value: u64,
}

pub struct TrendEstimator {
    clock: Arc<dyn Clock>,
    capacity: usize,
    samples: VecDeque<Sample>,
}

impl TrendEstimator {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.max(1);
        Self {
            clock,
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Record `value` at the clock's current time.
    pub fn add_sample(&mut self, value: u64) {
        let at = self.clock.now();
        self.add_sample_at(at, value);
    }

    /// Record `value` at `at`, evicting the oldest sample when the window is full.
    pub fn add_sample_at(&mut self, at: f64, value: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { at, value });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Mean depth over the window; `0.0` when empty.
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.samples.iter().map(|s| s.value as f64).sum();
        sum / self.samples.len() as f64
    }

    /// Slope over its standard error, or `None` when the window is not full or the
    /// regression is degenerate.
    pub fn score(&self) -> Option<f64> {
        if !self.is_full() || self.samples.len() < 3 {
            return None;
        }
        let n = self.samples.len() as f64;
        let mean_x = self.samples.iter().map(|s| s.at).sum::<f64>() / n;
        let mean_y = self.mean();

        let (mut sxx, mut sxy) = (0.0, 0.0);
        for s in &self.samples {
            let dx = s.at - mean_x;
            sxx += dx * dx;
            sxy += dx * (s.value as f64 - mean_y);
        }
        if sxx <= 0.0 || !sxx.is_finite() {
            return None;
        }

        let slope = sxy / sxx;
        let intercept = mean_y - slope * mean_x;
        let ssr: f64 = self
            .samples
            .iter()
            .map(|s| {
                let residual = s.value as f64 - (intercept + slope * s.at);
                residual * residual
            })
            .sum();

        let stderr = ((ssr / (n - 2.0)) / sxx).sqrt();
        if !stderr.is_finite() || stderr <= MIN_STDERR {
            return None;
        }
        let score = slope / stderr;
        score.is_finite().then_some(score)
    }

    pub fn is_increasing(&self) -> bool {
        self.score().is_some_and(|s| s > SIGNIFICANCE)
    }

    pub fn is_decreasing(&self) -> bool {
        self.score().is_some_and(|s| s < -SIGNIFICANCE)
    }
}

impl std::fmt::Debug for TrendEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrendEstimator")
            .field("capacity", &self.capacity)
            .field("len", &self.samples.len())
            .field("mean", &self.mean())
            .finish()
    }
}
