//! Exponential backoff shared by the router poll loop and lifecycle retries.

use std::time::Duration;

/// Doubling backoff bounded by a ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// New backoff starting at `initial` and never exceeding `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; the following call returns twice as much, up to the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Back to the initial delay after a success.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped at `max`.
    pub fn delay_for_attempt(base: Duration, attempt: u32, max: Duration) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        base.saturating_mul(factor).min(max)
    }
}
