use std::time::Duration;

/// Trips after too many consecutive failed status queries, backing off between them.
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive_failures: u32,
    base_delay: Duration,
    max_delay: Duration,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CircuitBreakerState {
    RetryAfter(Duration),
    Open { failures: u32 },
}

impl CircuitBreaker {
    pub fn new(threshold: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
            base_delay,
            max_delay: if max_delay.is_zero() {
                base_delay
            } else {
                max_delay
            },
        }
    }

    /// Tolerates a handful of throttled or dropped status calls.
    pub fn for_status_queries() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(30))
    }

    pub fn record_failure(&mut self) -> CircuitBreakerState {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.threshold {
            CircuitBreakerState::Open {
                failures: self.consecutive_failures,
            }
        } else {
            CircuitBreakerState::RetryAfter(self.delay_for(self.consecutive_failures))
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn delay_for(&self, failures: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }

        let factor = 1u32 << failures.saturating_sub(1).min(6);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}
