use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker for index-creation operations, keyed per table.
///
/// closed -> open after `failure_threshold` consecutive failures;
/// open -> half_open once `timeout` elapsed; half_open -> closed after
/// `success_threshold` successes, back to open on any failure.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    success_threshold: u32,
    timeout: Duration,
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        success_threshold: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            success_threshold,
            timeout,
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            opened_at: None,
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            BreakerState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.success_threshold {
                    self.state = BreakerState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                    info!(breaker = %self.name, "circuit breaker closed (recovered)");
                }
            }
            BreakerState::Closed => {
                self.failure_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure = Some(Instant::now());

        match self.state {
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open;
                self.opened_at = Some(Instant::now());
                self.success_count = 0;
                warn!(breaker = %self.name, "circuit breaker opened (failed during recovery)");
            }
            BreakerState::Closed if self.failure_count >= self.failure_threshold => {
                self.state = BreakerState::Open;
                self.opened_at = Some(Instant::now());
                warn!(
                    breaker = %self.name,
                    failures = self.failure_count,
                    "circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    /// Check whether the protected operation may run; drives the
    /// open -> half_open transition once the timeout elapsed.
    pub fn can_proceed(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let opened_at = self
                    .opened_at
                    .expect("open breaker always carries opened_at");
                if opened_at.elapsed() >= self.timeout {
                    self.state = BreakerState::HalfOpen;
                    self.success_count = 0;
                    info!(breaker = %self.name, "circuit breaker half-open (testing recovery)");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }
}

/// Process-wide breaker map. The map mutex also guards breaker internals;
/// every operation is a short critical section.
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    failure_threshold: u32,
    success_threshold: u32,
    timeout: Duration,
}

impl BreakerRegistry {
    pub fn new(failure_threshold: u32, success_threshold: u32, timeout: Duration) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            failure_threshold,
            success_threshold,
            timeout,
        }
    }

    fn with_breaker<R>(&self, name: &str, f: impl FnOnce(&mut CircuitBreaker) -> R) -> R {
        let mut map = self.breakers.lock().expect("breaker registry lock poisoned");
        let breaker = map.entry(name.to_string()).or_insert_with(|| {
            CircuitBreaker::new(
                name,
                self.failure_threshold,
                self.success_threshold,
                self.timeout,
            )
        });
        f(breaker)
    }

    pub fn can_proceed(&self, name: &str) -> bool {
        self.with_breaker(name, CircuitBreaker::can_proceed)
    }

    pub fn record_success(&self, name: &str) {
        self.with_breaker(name, CircuitBreaker::record_success)
    }

    pub fn record_failure(&self, name: &str) {
        self.with_breaker(name, CircuitBreaker::record_failure)
    }

    pub fn state(&self, name: &str) -> BreakerState {
        self.with_breaker(name, |breaker| breaker.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new("index_creation_orders", 5, 2, timeout)
    }

    #[test]
    fn opens_after_failure_threshold_in_closed() {
        let mut cb = breaker(Duration::from_secs(60));
        for _ in 0..4 {
            cb.record_failure();
            assert_eq!(cb.state(), BreakerState::Closed);
        }
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.can_proceed());
    }

    #[test]
    fn consecutive_successes_never_open() {
        let mut cb = breaker(Duration::from_secs(60));
        for _ in 0..100 {
            cb.record_success();
        }
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.can_proceed());
    }

    #[test]
    fn success_resets_failure_streak_in_closed() {
        let mut cb = breaker(Duration::from_secs(60));
        for _ in 0..4 {
            cb.record_failure();
        }
        cb.record_success();
        for _ in 0..4 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_after_timeout_then_closes_on_successes() {
        let mut cb = breaker(Duration::ZERO);
        for _ in 0..5 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), BreakerState::Open);
        // Timeout already elapsed, the next probe transitions to half-open.
        assert!(cb.can_proceed());
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn failure_during_half_open_reopens() {
        let mut cb = breaker(Duration::ZERO);
        for _ in 0..5 {
            cb.record_failure();
        }
        assert!(cb.can_proceed());
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn registry_keys_breakers_independently() {
        let registry = BreakerRegistry::new(5, 2, Duration::from_secs(60));
        for _ in 0..5 {
            registry.record_failure("index_creation_orders");
        }
        assert!(!registry.can_proceed("index_creation_orders"));
        assert!(registry.can_proceed("index_creation_users"));
        assert_eq!(registry.state("index_creation_orders"), BreakerState::Open);
    }
}
