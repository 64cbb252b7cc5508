//! Circuit Breaker for Provider Resilience
//!
//! One breaker per configured provider, shared process-wide by every run.
//! An open breaker makes the provider count as "down" for selection.
//!
//! ```text
//! Closed --[failure_threshold consecutive failures]--> Open
//! Open --[open_timeout elapsed]--> HalfOpen
//! HalfOpen --[success_threshold successes]--> Closed
//! HalfOpen --[any failure]--> Open
//! ```

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::constants::circuit_breaker as cb_constants;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Provider is failing, requests rejected immediately
    Open,
    /// Probing recovery with a limited number of requests
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Time spent open before probing
    pub open_timeout: Duration,
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: cb_constants::FAILURE_THRESHOLD,
            success_threshold: cb_constants::SUCCESS_THRESHOLD,
            open_timeout: Duration::from_secs(cb_constants::RECOVERY_TIMEOUT_SECS),
            half_open_max_requests: cb_constants::HALF_OPEN_MAX_REQUESTS,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
    opened_at: Option<Instant>,
    rejected: u64,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            half_open_in_flight: 0,
            opened_at: None,
            rejected: 0,
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.half_open_successes = 0;
        self.half_open_in_flight = 0;
        self.consecutive_failures = 0;
    }

    /// Open -> HalfOpen once the cool-down has passed
    fn refresh(&mut self, open_timeout: Duration) {
        if self.state == CircuitState::Open
            && let Some(opened_at) = self.opened_at
            && opened_at.elapsed() >= open_timeout
        {
            self.state = CircuitState::HalfOpen;
            self.half_open_successes = 0;
            self.half_open_in_flight = 0;
        }
    }
}

/// Thread-safe circuit breaker; every transition happens under one lock.
pub struct CircuitBreaker {
    provider: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(provider: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        inner.refresh(self.config.open_timeout);
        inner.state
    }

    /// Whether selection may consider this provider right now (no side effects
    /// on the half-open request budget).
    pub fn is_available(&self) -> bool {
        let mut inner = self.lock();
        inner.refresh(self.config.open_timeout);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => inner.half_open_in_flight < self.config.half_open_max_requests,
        }
    }

    /// Reserve a slot for one request. Returns `false` when the circuit rejects it.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        inner.refresh(self.config.open_timeout);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                inner.rejected += 1;
                debug!(
                    provider = %self.provider,
                    rejected = inner.rejected,
                    "Circuit OPEN, request rejected"
                );
                false
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_requests {
                    inner.half_open_in_flight += 1;
                    debug!(
                        provider = %self.provider,
                        trial = inner.half_open_in_flight,
                        "Circuit HALF_OPEN, allowing trial request"
                    );
                    true
                } else {
                    inner.rejected += 1;
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.config.success_threshold {
                *inner = BreakerState {
                    rejected: inner.rejected,
                    ..BreakerState::closed()
                };
                info!(provider = %self.provider, "Circuit CLOSED, provider recovered");
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.open();
                    warn!(
                        provider = %self.provider,
                        failures = self.config.failure_threshold,
                        cool_down = ?self.config.open_timeout,
                        "Circuit OPEN"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.open();
                warn!(provider = %self.provider, "Circuit re-opened after failed trial request");
            }
            CircuitState::Open => {}
        }
    }

    /// Manual reset to CLOSED
    pub fn reset(&self) {
        *self.lock() = BreakerState::closed();
        info!(provider = %self.provider, "Circuit manually reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            open_timeout: Duration::from_millis(20),
            half_open_max_requests: 1,
        }
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = CircuitBreaker::new("p", quick_config());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_available());
        assert!(!cb.try_acquire());
        assert_eq!(cb.lock().rejected, 1);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let cb = CircuitBreaker::new("p", quick_config());
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_recovery() {
        let cb = CircuitBreaker::new("p", quick_config());
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire());
        assert!(!cb.try_acquire());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("p", quick_config());
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));

        assert!(cb.try_acquire());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_reset() {
        let cb = CircuitBreaker::new("p", quick_config());
        cb.record_failure();
        cb.record_failure();
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire());
    }
}
