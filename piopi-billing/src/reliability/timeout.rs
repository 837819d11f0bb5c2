//! Deadlines for collaborator calls.

use std::time::Duration;

use crate::error::{BillingError, Result};

/// Runs `future` with a deadline.
///
/// # Errors
///
/// Returns [`BillingError::Timeout`] naming `operation` if the deadline elapses, otherwise
/// whatever `future` returns.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use piopi_billing::{error::BillingError, reliability::with_timeout};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let slow = async {
///     tokio::time::sleep(Duration::from_secs(5)).await;
///     Ok::<_, BillingError>(())
/// };
/// let err = with_timeout("promo validation", Duration::from_millis(10), slow).await.unwrap_err();
/// assert!(matches!(err, BillingError::Timeout { .. }));
/// # }
/// ```
pub async fn with_timeout<T, F>(operation: &'static str, limit: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, future).await.unwrap_or_else(|_| {
        Err(BillingError::Timeout {
            operation,
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        })
    })
}
