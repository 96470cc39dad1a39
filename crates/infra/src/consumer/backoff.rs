//! Fetch retry backoff.
//!
//! The delay sequence across consecutive failures is `0, first, 2·first,
//! 4·first, …`, clamped to `max` when one is configured. Any success resets
//! it to zero.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    first: Duration,
    max: Option<Duration>,
    current: Duration,
}

impl Backoff {
    pub fn new(first: Duration, max: Option<Duration>) -> Self {
        Self {
            first,
            max,
            current: Duration::ZERO,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Escalate after a failure and return the new delay.
    pub fn advance(&mut self) -> Duration {
        let next = if self.current.is_zero() {
            self.first
        } else {
            self.current.saturating_mul(2)
        };
        self.current = match self.max {
            Some(max) => next.min(max),
            None => next,
        };
        self.current
    }

    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
    }
}
