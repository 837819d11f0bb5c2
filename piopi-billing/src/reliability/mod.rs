//! Reliability helpers for collaborator calls and conditional writes.
//!
//! Provides deadline enforcement for promo validation and notification dispatch, a circuit
//! breaker shielding the notification dispatcher, and the retry loop used to re-run a
//! read-compute-write cycle after a version conflict.

mod circuit_breaker;
mod retry;
mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{RetryPolicy, is_retryable, retry_with_backoff};
pub use timeout::with_timeout;
