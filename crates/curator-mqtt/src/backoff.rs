//! Reconnect backoff policy
//!
//! Delay for attempt `n` is `first × factor^n`, clamped to `max`. The base is
//! derived purely from the attempt number, so delays never shrink over a long
//! outage and reset only when a connection succeeds.

use std::time::Duration;

/// Backoff schedule for broker reconnect attempts
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub first: Duration,
    /// Maximum delay cap
    pub max: Duration,
    /// Multiplicative growth factor
    pub factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Compute the delay for the given attempt number (0-indexed)
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let secs = self.first.as_secs_f64() * self.factor.powi(attempt.min(i32::MAX as u32) as i32);

        if !secs.is_finite() || secs < 0.0 || secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_and_caps() {
        let policy = ReconnectPolicy {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
        };
        assert_eq!(policy.next(0), Duration::from_secs(1));
        assert_eq!(policy.next(1), Duration::from_secs(2));
        assert_eq!(policy.next(3), Duration::from_secs(8));
        assert_eq!(policy.next(10), Duration::from_secs(60));
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn constant_factor_keeps_first() {
        let policy = ReconnectPolicy {
            first: Duration::from_millis(500),
            max: Duration::from_secs(10),
            factor: 1.0,
        };
        assert_eq!(policy.next(0), Duration::from_millis(500));
        assert_eq!(policy.next(9), Duration::from_millis(500));
    }
}
