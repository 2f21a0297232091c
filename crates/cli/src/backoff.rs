//! Reconnect backoff
//!
//! The delay for attempt `n` is `first × factor^n`, clamped to `max`. The
//! attempt counter is reset by the supervisor after every successful CONNACK.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay before the first reconnect attempt
    pub first: Duration,
    /// Upper bound for any delay
    pub max: Duration,
    /// Multiplicative growth per attempt
    pub factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
        }
    }
}

impl Backoff {
    /// Delay to wait before reconnect attempt `attempt` (0-indexed)
    pub fn next(&self, attempt: u32) -> Duration {
        let base = self.first.as_secs_f64() * self.factor.powi(attempt.min(64) as i32);
        if !base.is_finite() || base >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(base).max(self.first.min(self.max))
    }
}
