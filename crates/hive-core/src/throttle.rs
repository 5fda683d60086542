//! # Worker start throttle.
//!
//! Each pool owns a [`Throttle`]: a failure counter bounded by [`ThrottlePolicy::max`].
//! Failing exits push the counter up, successful exits pull it down, and the derived
//! delay `ln(counter) × factor` is the minimum spacing between worker starts.
//!
//! The logarithmic curve backs off gently for the first failures and grows as they
//! accumulate, while the counter bound keeps the delay finite.
//!
//! ```rust
//! use hive_core::{Throttle, ThrottlePolicy};
//!
//! let mut throttle = Throttle::new(ThrottlePolicy::default());
//! assert_eq!(throttle.delay_seconds(), 0.0);
//!
//! throttle.adjust(false);
//! throttle.adjust(false);
//! assert!((throttle.delay_seconds() - 2f64.ln()).abs() < 1e-12);
//! assert!(throttle.is_throttled(10.5, 10.0));
//! assert!(!throttle.is_throttled(11.0, 10.0));
//! ```
use serde::Deserialize;

/// Parameters shared by all throttles in one supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct ThrottlePolicy {
    /// Upper bound of the failure counter.
    pub max: u32,
    /// Seconds per unit of `ln(counter)`.
    pub factor: f64,
}

impl Default for ThrottlePolicy {
    /// Returns `max = 16`, `factor = 1.0`.
    fn default() -> Self {
        Self {
            max: 16,
            factor: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Throttle {
    policy: ThrottlePolicy,
    counter: u32,
}

impl Throttle {
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self { policy, counter: 0 }
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn policy(&self) -> ThrottlePolicy {
        self.policy
    }

    /// Step the counter down on success, up on failure, clamped to `[0, max]`.
    pub fn adjust(&mut self, success: bool) {
        self.counter = if success {
            self.counter.saturating_sub(1)
        } else {
            self.counter.saturating_add(1).min(self.policy.max)
        };
    }

    /// Minimum spacing between starts, in seconds.
    pub fn delay_seconds(&self) -> f64 {
        if self.counter == 0 {
            return 0.0;
        }
        (self.counter as f64).ln() * self.policy.factor
    }

    /// True while fewer than [`Throttle::delay_seconds`] have passed since `last_start`.
    pub fn is_throttled(&self, now: f64, last_start: f64) -> bool {
        now - last_start < self.delay_seconds()
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(ThrottlePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_stays_within_bounds() {
        let mut t = Throttle::new(ThrottlePolicy { max: 3, factor: 1.0 });
        t.adjust(true);
        assert_eq!(t.counter(), 0);

        for _ in 0..10 {
            t.adjust(false);
            assert!(t.counter() <= 3);
        }
        assert_eq!(t.counter(), 3);

        for _ in 0..10 {
            t.adjust(true);
        }
        assert_eq!(t.counter(), 0);
    }

    #[test]
    fn delay_is_zero_at_rest_and_grows_with_failures() {
        let mut t = Throttle::default();
        assert_eq!(t.delay_seconds(), 0.0);

        let mut prev = t.delay_seconds();
        for _ in 0..16 {
            t.adjust(false);
            let d = t.delay_seconds();
            assert!(d >= prev);
            assert!(d.is_finite());
            prev = d;
        }
        assert!((prev - 16f64.ln()).abs() < 1e-12);

        // strictly increasing above the first failure
        let mut t = Throttle::default();
        t.adjust(false);
        t.adjust(false);
        let two = t.delay_seconds();
        t.adjust(false);
        assert!(t.delay_seconds() > two);
    }

    #[test]
    fn factor_scales_delay() {
        let mut t = Throttle::new(ThrottlePolicy { max: 16, factor: 2.5 });
        for _ in 0..4 {
            t.adjust(false);
        }
        assert!((t.delay_seconds() - 4f64.ln() * 2.5).abs() < 1e-12);
    }

    #[test]
    fn throttled_only_inside_delay_window() {
        let mut t = Throttle::default();
        assert!(!t.is_throttled(0.0, 0.0));

        for _ in 0..3 {
            t.adjust(false);
        }
        let delay = t.delay_seconds();
        assert!(t.is_throttled(100.0 + delay / 2.0, 100.0));
        assert!(!t.is_throttled(100.0 + delay + 1e-9, 100.0));
        assert!(!t.is_throttled(100.0 + delay + 1.0, 100.0));
    }
}
