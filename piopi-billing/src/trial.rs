//! Trial policy.
//!
//! A trial lasts a configured number of base days, extended by 30 days per free month
//! granted by a validated promo code. The extension is fixed at creation time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Days credited per promo free month.
pub const DAYS_PER_PROMO_MONTH: u32 = 30;

/// Date range during which a subscription incurs no charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialWindow {
    /// First instant of the trial.
    pub start: DateTime<Utc>,
    /// Instant the trial lapses.
    pub end: DateTime<Utc>,
}

impl TrialWindow {
    /// Returns `true` if `instant` falls inside the window.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Whole days left at `now`, zero once the trial is over.
    #[must_use]
    pub fn remaining_days(&self, now: DateTime<Utc>) -> i64 {
        (self.end - now).num_days().max(0)
    }
}

/// Computes the trial window starting at `start`.
///
/// `end = start + base_days + promo_free_months * 30` days, saturating at the latest
/// representable instant.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use piopi_billing::trial::compute_trial_window;
///
/// let start = Utc::now();
/// let window = compute_trial_window(start, 30, 2);
/// assert_eq!(window.end - window.start, Duration::days(90));
/// ```
#[must_use]
pub fn compute_trial_window(
    start: DateTime<Utc>,
    base_days: u32,
    promo_free_months: u32,
) -> TrialWindow {
    let days = i64::from(base_days) + i64::from(promo_free_months) * i64::from(DAYS_PER_PROMO_MONTH);
    let end = Duration::try_days(days)
        .and_then(|length| start.checked_add_signed(length))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    TrialWindow { start, end }
}

/// Trial length resolved once from configuration.
///
/// Has no `Default`: the base length must come from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialPolicy {
    /// Trial days granted before any promo extension.
    pub base_days: u32,
}

impl TrialPolicy {
    /// Creates a policy with the given base length.
    #[must_use]
    pub const fn new(base_days: u32) -> Self {
        Self { base_days }
    }

    /// Computes the window for a trial starting at `start`.
    #[must_use]
    pub fn window(&self, start: DateTime<Utc>, promo_free_months: u32) -> TrialWindow {
        compute_trial_window(start, self.base_days, promo_free_months)
    }
}
