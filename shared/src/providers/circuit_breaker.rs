// ============================================================================
// Circuit Breaker
// ============================================================================
//
// CLOSED -> OPEN after `failure_threshold` consecutive-ish failures;
// OPEN -> HALF_OPEN once `cooldown` has passed; HALF_OPEN -> CLOSED after
// `recovery_threshold` successes, or straight back to OPEN on any failure.
//
// ============================================================================

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    recovery_threshold: u32,
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration, recovery_threshold: u32) -> Self {
        Self {
            failure_threshold,
            cooldown,
            recovery_threshold,
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Whether a dispatch may proceed right now.
    pub fn can_execute(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooled = self
                    .last_failure
                    .map(|at| at.elapsed() >= self.cooldown)
                    .unwrap_or(true);
                if cooled {
                    self.state = BreakerState::HalfOpen;
                    self.success_count = 0;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => true,
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            BreakerState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.recovery_threshold {
                    self.state = BreakerState::Closed;
                    self.failure_count = 0;
                }
            }
            BreakerState::Closed => {
                self.failure_count = self.failure_count.saturating_sub(1);
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure = Some(Instant::now());

        if self.state == BreakerState::HalfOpen || self.failure_count >= self.failure_threshold {
            self.state = BreakerState::Open;
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60), 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60), 2);
        assert!(breaker.can_execute());

        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn half_open_after_cooldown_then_closes_on_recovery() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_millis(0), 2);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        // Zero cooldown: next probe is allowed
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_millis(0), 2);
        breaker.record_failure();
        assert!(breaker.can_execute());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn closed_successes_decay_failure_count() {
        let mut breaker = CircuitBreaker::new(2, Duration::from_secs(60), 1);
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        // One failure decayed, so still closed
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
