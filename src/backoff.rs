//! Exponential backoff shared by the HTTP retry stage and the operation waiter.

use rand::Rng;
use std::time::Duration;

/// Default first sleep between attempts.
pub const DEFAULT_INITIAL: Duration = Duration::from_secs(1);
/// Default upper bound for a single sleep.
pub const DEFAULT_MAX: Duration = Duration::from_secs(10);
/// Default relative jitter (±20%).
pub const DEFAULT_JITTER: f64 = 0.2;

/// Doubling backoff with a cap and symmetric jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: f64,
    next: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL, DEFAULT_MAX, DEFAULT_JITTER)
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            initial,
            max,
            jitter: jitter.clamp(0.0, 1.0),
            next: initial,
        }
    }

    /// Same schedule without jitter. Used where tests need exact timings.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// The un-jittered interval the next call to [`Backoff::next_delay`] is based on.
    pub fn current(&self) -> Duration {
        self.next
    }

    /// Return the next sleep and advance the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next;
        self.next = (self.next * 2).min(self.max);
        if self.jitter == 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        base.mul_f64(factor)
    }

    /// Restart from the initial interval.
    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}
