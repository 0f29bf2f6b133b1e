//! # Fibonacci Backoff
//!
//! Requeue delays for failed reconciles grow along the Fibonacci sequence in
//! whole minutes and stop at a ceiling. Transient cloud failures use the
//! short ladder (1m … 10m); quota and authorization failures, which need an
//! operator to act, use the extended one (5m … 30m).

use crate::error::ErrorClass;
use std::time::Duration;

/// Minute bounds of a backoff ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffLimits {
    /// First (and second) delay
    pub min_minutes: u64,
    /// Ceiling
    pub max_minutes: u64,
}

/// Ladder for transient failures
pub const TRANSIENT: BackoffLimits = BackoffLimits {
    min_minutes: 1,
    max_minutes: 10,
};

/// Ladder for quota and authorization failures
pub const EXTENDED: BackoffLimits = BackoffLimits {
    min_minutes: 5,
    max_minutes: 30,
};

/// Fibonacci backoff calculator
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    limits: BackoffLimits,
    prev_minutes: u64,
    current_minutes: u64,
}

impl FibonacciBackoff {
    /// Start a ladder at its minimum
    #[must_use]
    pub fn new(limits: BackoffLimits) -> Self {
        Self {
            limits,
            prev_minutes: 0,
            current_minutes: limits.min_minutes,
        }
    }

    /// Bounds of this ladder
    pub fn limits(&self) -> BackoffLimits {
        self.limits
    }

    /// Next delay; advances the ladder
    pub fn next_backoff(&mut self) -> Duration {
        let delay = Duration::from_secs(self.current_minutes * 60);
        let next = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = next.min(self.limits.max_minutes);
        delay
    }

    /// Back to the first rung
    pub fn reset(&mut self) {
        self.prev_minutes = 0;
        self.current_minutes = self.limits.min_minutes;
    }
}

/// Per-object retry bookkeeping
#[derive(Debug, Clone)]
pub struct BackoffState {
    backoff: FibonacciBackoff,
    /// Consecutive failures
    pub error_count: u32,
}

impl BackoffState {
    /// Fresh state on the transient ladder
    pub fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(TRANSIENT),
            error_count: 0,
        }
    }

    /// Record a failure of `class` and return the requeue delay.
    ///
    /// Switching between the transient and extended ladders restarts the
    /// new ladder from its minimum.
    pub fn record_failure(&mut self, class: ErrorClass) -> Duration {
        let limits = match class {
            ErrorClass::QuotaOrAuthorization => EXTENDED,
            _ => TRANSIENT,
        };
        if self.backoff.limits() != limits {
            self.backoff = FibonacciBackoff::new(limits);
        }
        self.error_count += 1;
        self.backoff.next_backoff()
    }

    /// Forget failures after a successful reconcile
    pub fn reset(&mut self) {
        self.backoff.reset();
        self.error_count = 0;
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(backoff: &mut FibonacciBackoff, n: usize) -> Vec<u64> {
        (0..n).map(|_| backoff.next_backoff().as_secs() / 60).collect()
    }

    #[test]
    fn test_transient_ladder() {
        let mut backoff = FibonacciBackoff::new(TRANSIENT);
        assert_eq!(minutes(&mut backoff, 9), vec![1, 1, 2, 3, 5, 8, 10, 10, 10]);
    }

    #[test]
    fn test_extended_ladder() {
        let mut backoff = FibonacciBackoff::new(EXTENDED);
        assert_eq!(minutes(&mut backoff, 6), vec![5, 5, 10, 15, 25, 30]);
    }

    #[test]
    fn test_reset_restarts_ladder() {
        let mut backoff = FibonacciBackoff::new(TRANSIENT);
        minutes(&mut backoff, 4);
        backoff.reset();
        assert_eq!(minutes(&mut backoff, 3), vec![1, 1, 2]);
    }

    #[test]
    fn test_state_switches_ladder_by_class() {
        let mut state = BackoffState::new();
        assert_eq!(state.record_failure(ErrorClass::Transient), Duration::from_secs(60));
        assert_eq!(state.record_failure(ErrorClass::Transient), Duration::from_secs(60));
        assert_eq!(
            state.record_failure(ErrorClass::QuotaOrAuthorization),
            Duration::from_secs(300)
        );
        assert_eq!(state.error_count, 3);

        state.reset();
        assert_eq!(state.error_count, 0);
        assert_eq!(
            state.record_failure(ErrorClass::QuotaOrAuthorization),
            Duration::from_secs(300)
        );
    }
}
