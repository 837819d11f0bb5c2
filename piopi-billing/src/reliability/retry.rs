//! Retry loop with exponential backoff.
//!
//! Conditional writes that lose a race surface [`BillingError::VersionConflict`]; the
//! lifecycle re-runs its whole read-compute-write cycle through [`retry_with_backoff`].

use std::time::Duration;

use tracing::{debug, info};

use crate::error::{BillingError, Result};

/// Configuration for retry behavior.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use piopi_billing::reliability::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_attempts, 6);
///
/// let patient = RetryPolicy {
///     max_attempts: 10,
///     initial_delay: Duration::from_millis(10),
///     max_delay: Duration::from_millis(500),
///     backoff_multiplier: 2.0,
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one (default: 6, i.e. five retries)
    pub max_attempts: u32,
    /// Delay before the first retry (default: 5ms)
    pub initial_delay: Duration,
    /// Upper bound on a single delay (default: 200ms)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy allowing `retries` retries after the first attempt.
    ///
    /// ```
    /// use piopi_billing::reliability::RetryPolicy;
    ///
    /// assert_eq!(RetryPolicy::with_retries(5).max_attempts, 6);
    /// ```
    #[must_use]
    pub fn with_retries(retries: u32) -> Self {
        Self { max_attempts: retries.saturating_add(1), ..Self::default() }
    }

    /// Delay before retry number `attempt` (zero based), capped at `max_delay`.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        #[allow(
            clippy::cast_precision_loss,
            reason = "acceptable for duration calculations"
        )]
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_precision_loss,
            clippy::cast_sign_loss,
            reason = "delay_ms is non-negative and clamped by max_delay below"
        )]
        let delay = Duration::from_millis(delay_ms.min(u64::MAX as f64) as u64);
        delay.min(self.max_delay)
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or the policy's
/// attempts are used up.
///
/// A policy with `max_attempts == 0` still runs the operation once.
///
/// # Errors
///
/// Returns the first non-retryable error, or the last error once attempts run out.
pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(attempt = attempt + 1, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if attempt + 1 < policy.max_attempts && is_retryable(&error) => {
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Determines if an error is worth retrying.
///
/// Version conflicts and collaborator timeouts are transient. Validation and state errors,
/// corrupt records and an open circuit are not.
///
/// ```
/// use piopi_billing::{error::BillingError, reliability::is_retryable};
///
/// assert!(is_retryable(&BillingError::VersionConflict { owner_id: "p-1".into(), expected: Some(3) }));
/// assert!(!is_retryable(&BillingError::SubscriptionNotFound("p-1".into())));
/// ```
#[must_use]
pub const fn is_retryable(error: &BillingError) -> bool {
    matches!(error, BillingError::VersionConflict { .. } | BillingError::Timeout { .. })
}

#[cfg(test)]
#[allow(clippy::float_cmp, reason = "test code compares exact defaults")]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    fn conflict() -> BillingError {
        BillingError::VersionConflict { owner_id: "p-1".into(), expected: Some(1) }
    }

    // ========================================================================
    // Policy Tests
    // ========================================================================

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 6);
        assert_eq!(policy.initial_delay, Duration::from_millis(5));
        assert_eq!(policy.max_delay, Duration::from_millis(200));
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_delay_for_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(5));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(20));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(30), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(200));
    }

    // ========================================================================
    // Retry Loop Tests
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_retries_conflicts_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = retry_with_backoff(&RetryPolicy::with_retries(5), || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 { Err(conflict()) } else { Ok(42) }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<()> = retry_with_backoff(&RetryPolicy::with_retries(2), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(conflict()) }
        })
        .await;

        assert!(matches!(result, Err(BillingError::VersionConflict { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = retry_with_backoff(&RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BillingError::SubscriptionNotFound("p-1".into())) }
        })
        .await;

        assert!(matches!(result, Err(BillingError::SubscriptionNotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy { max_attempts: 0, ..RetryPolicy::default() };
        let result = retry_with_backoff(&policy, || async { Ok::<_, BillingError>("done") }).await;
        assert_eq!(result.unwrap(), "done");
    }

    // ========================================================================
    // Classification Tests
    // ========================================================================

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&conflict()));
        assert!(is_retryable(&BillingError::Timeout { operation: "notification", timeout_ms: 5 }));
        assert!(!is_retryable(&BillingError::CircuitOpen("notifier")));
        assert!(!is_retryable(&BillingError::CorruptRecord("bad".into())));
        assert!(!is_retryable(&BillingError::DuplicateSubscription("p-1".into())));
        assert!(!is_retryable(&BillingError::UnknownTier("gold".into())));
    }
}
