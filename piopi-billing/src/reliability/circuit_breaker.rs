//! Circuit breaker for the notification dispatcher.
//!
//! Once the dispatcher fails `failure_threshold` times in a row the breaker opens and calls
//! are skipped with [`BillingError::CircuitOpen`] instead of each paying a full timeout.
//! After `reset_timeout` one call is let through to probe recovery.
//!
//! ```text
//! Closed   -- failure streak reaches threshold -->  Open
//! Open     -- reset_timeout elapsed, next call -->  HalfOpen
//! HalfOpen -- enough probe successes           -->  Closed
//! HalfOpen -- probe fails                      -->  Open
//! ```

use std::{
    sync::atomic::{AtomicU8, AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{BillingError, Result};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Calls flow through.
    Closed = 0,
    /// Calls are rejected without reaching the collaborator.
    Open = 1,
    /// Probing recovery.
    HalfOpen = 2,
}

/// Configuration for [`CircuitBreaker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens (default: 5).
    pub failure_threshold: u64,
    /// Consecutive successes in `HalfOpen` before the circuit closes (default: 1).
    pub success_threshold: u64,
    /// Time spent open before probing (default: 60s).
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, success_threshold: 1, reset_timeout: Duration::from_secs(60) }
    }
}

/// Circuit breaker guarding one collaborator.
///
/// Safe to share between concurrent lifecycle calls.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    state: AtomicU8,
    failure_count: AtomicU64,
    success_count: AtomicU64,
    last_failure: RwLock<Option<Instant>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Creates a closed breaker for the collaborator called `name`.
    #[must_use]
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            last_failure: RwLock::new(None),
            config,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> CircuitState {
        match self.state.load(Ordering::Acquire) {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }

    /// Runs `operation` through the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::CircuitOpen`] without running `operation` while the circuit
    /// is open, otherwise the operation's own error.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.state() == CircuitState::Open {
            let last_failure = *self.last_failure.read().await;
            match last_failure {
                Some(at) if at.elapsed() >= self.config.reset_timeout => {
                    self.transition_to_half_open();
                }
                _ => return Err(BillingError::CircuitOpen(self.name)),
            }
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure().await;
                Err(error)
            }
        }
    }

    fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => self.failure_count.store(0, Ordering::Release),
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold {
                    self.transition_to_closed();
                }
            }
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        *self.last_failure.write().await = Some(Instant::now());

        if self.state() == CircuitState::HalfOpen || failures >= self.config.failure_threshold {
            self.transition_to_open();
        }
    }

    fn transition_to_open(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        warn!(collaborator = self.name, "circuit breaker opened");
    }

    fn transition_to_half_open(&self) {
        self.state.store(CircuitState::HalfOpen as u8, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        info!(collaborator = self.name, "circuit breaker half-open, probing recovery");
    }

    fn transition_to_closed(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        self.failure_count.store(0, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        info!(collaborator = self.name, "circuit breaker closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u64, reset_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "notifier",
            CircuitBreakerConfig { failure_threshold, success_threshold: 1, reset_timeout },
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<()> {
        breaker.call(|| async { Err(BillingError::Notification("smtp down".into())) }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<()> {
        breaker.call(|| async { Ok(()) }).await
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.reset_timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let breaker = breaker(3, Duration::from_secs(60));
        let err = fail(&breaker).await.unwrap_err();
        assert!(matches!(err, BillingError::Notification(_)));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_skips_calls() {
        let breaker = breaker(2, Duration::from_secs(60));
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let mut called = false;
        let result = breaker
            .call(|| {
                called = true;
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(BillingError::CircuitOpen("notifier"))));
        assert!(!called);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let breaker = breaker(2, Duration::from_secs(60));
        let _ = fail(&breaker).await;
        succeed(&breaker).await.unwrap();
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_closes_circuit() {
        let breaker = breaker(1, Duration::from_millis(20));
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = breaker(1, Duration::from_millis(20));
        let _ = fail(&breaker).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
