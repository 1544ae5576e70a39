//! Sliding-window rate limiter.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::core::router::RateLimiter;

/// Allows at most `max_requests` per key within any `window`.
///
/// Rejected requests are not recorded, so a sender hammering the limit is
/// admitted again as soon as its oldest accepted request leaves the window.
pub struct SlidingWindowRateLimiter {
    max_requests: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl SlidingWindowRateLimiter {
    /// Limiter admitting `max_requests` per `window`.
    pub fn new(max_requests: usize, window: std::time::Duration) -> Self {
        Self {
            max_requests,
            window: Duration::from_std(window).unwrap_or(Duration::MAX),
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.hits.lock().len()
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

fn expire(hits: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while hits.front().is_some_and(|at| *at <= cutoff) {
        hits.pop_front();
    }
}

impl RateLimiter for SlidingWindowRateLimiter {
    fn check(&self, key: &str, now: DateTime<Utc>) -> bool {
        let cutoff = self.cutoff(now);
        let mut hits = self.hits.lock();
        let window = hits.entry(key.to_string()).or_default();
        expire(window, cutoff);
        if window.len() >= self.max_requests {
            return false;
        }
        window.push_back(now);
        true
    }

    fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = self.cutoff(now);
        let mut hits = self.hits.lock();
        let before = hits.len();
        hits.retain(|_, window| {
            expire(window, cutoff);
            !window.is_empty()
        });
        before - hits.len()
    }
}
