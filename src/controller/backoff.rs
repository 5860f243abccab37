//! # Exponential Backoff
//!
//! Retry delays for targets whose last cycle failed in a retryable way.
//! Each failure doubles the delay until it reaches the cap; one healthy cycle
//! resets the sequence.
//!
//! ## Usage
//!
//! ```rust
//! use configsync_controller::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(15), Duration::from_secs(60));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(15));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(30));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(60));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(60));
//! ```

use std::time::Duration;

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// First delay handed out after a reset
    initial: Duration,
    /// Delay handed out by the next call
    current: Duration,
    /// Upper bound for any delay
    max: Duration,
    /// Consecutive failures since the last reset
    attempts: u32,
}

impl ExponentialBackoff {
    /// Create a new backoff starting at `initial` and capped at `max`
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            current: initial,
            max,
            attempts: 0,
        }
    }

    /// Get the next delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        self.attempts = self.attempts.saturating_add(1);
        result
    }

    /// Number of delays handed out since the last reset
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }
}
