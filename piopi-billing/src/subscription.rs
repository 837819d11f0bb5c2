//! Subscription data model.
//!
//! Strongly typed subscription and history records, plus the loosely typed
//! [`SubscriptionRow`] shape returned by the hosted store. Rows are validated when they
//! cross the storage boundary so a bad field fails fast as
//! [`BillingError::CorruptRecord`] instead of leaking into the lifecycle.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    catalog::PlanTierId,
    error::{BillingError, Result},
    pricing,
    promo::PromoCode,
    trial::TrialWindow,
};

/// Identifier of the parent account owning a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    /// Creates a new owner ID after validation.
    ///
    /// # Errors
    ///
    /// Returns error if ID is empty, exceeds 64 characters, or contains invalid characters.
    /// Only alphanumeric characters, hyphens, and underscores are allowed.
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(BillingError::InvalidOwnerId("owner_id cannot be empty".into()));
        }
        if id.len() > 64 {
            return Err(BillingError::InvalidOwnerId(
                "owner_id must be 64 characters or less".into(),
            ));
        }
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(BillingError::InvalidOwnerId(
                "owner_id can only contain alphanumeric characters, hyphens, and underscores"
                    .into(),
            ));
        }
        Ok(Self(id))
    }

    /// Returns the inner string reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OwnerId {
    type Error = BillingError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<OwnerId> for String {
    fn from(id: OwnerId) -> Self {
        id.0
    }
}

/// Unique identifier for a subscription record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How often the subscription is charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    /// Charged every month.
    Monthly,
    /// Charged once a year.
    Yearly,
}

impl BillingPeriod {
    /// Number of months covered by one charge.
    #[must_use]
    pub const fn months(self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::Yearly => 12,
        }
    }

    /// Wire identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// Returns the end of a period starting at `start`.
    #[must_use]
    pub fn period_end(self, start: DateTime<Utc>) -> DateTime<Utc> {
        start.checked_add_months(Months::new(self.months())).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl FromStr for BillingPeriod {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            other => Err(BillingError::CorruptRecord(format!("unknown billing period {other}"))),
        }
    }
}

/// Subscription status.
///
/// # State Machine
///
/// ```text
/// Trial ──┬──► Active ──┬──► Cancelled ──► Active | Trial (reactivation)
///         │             │
///         ├─────────────┼──► Cancelled
///         ▼             ▼
///       Expired ◄───────┘    (time-based)
/// ```
///
/// `Expired` only leaves through the admin reactivation path, which resets dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Free trial running.
    Trial,
    /// Paid and active.
    Active,
    /// Access has lapsed.
    Expired,
    /// Cancelled by the parent; access runs until the end date.
    Cancelled,
}

impl SubscriptionStatus {
    /// Wire identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns `true` if the ordinary lifecycle permits moving to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Trial, Self::Active | Self::Cancelled | Self::Expired)
                | (Self::Active, Self::Cancelled | Self::Expired)
                | (Self::Cancelled, Self::Active | Self::Trial)
        )
    }

    /// Returns `true` while the subscription still grants access.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Trial | Self::Active)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "trial" => Ok(Self::Trial),
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(BillingError::CorruptRecord(format!("unknown status {other}"))),
        }
    }
}

/// A parent's subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Record identifier.
    pub id: SubscriptionId,
    /// Parent account owning the subscription.
    pub owner_id: OwnerId,
    /// Current tier.
    pub plan_tier: PlanTierId,
    /// Billing period.
    pub billing_period: BillingPeriod,
    /// Child count the price is computed against.
    pub billed_child_count: u32,
    /// Monthly price at the last mutation.
    pub price: Decimal,
    /// Current status.
    pub status: SubscriptionStatus,
    /// Trial start.
    pub trial_start: DateTime<Utc>,
    /// Trial end, including any promo extension.
    pub trial_end: DateTime<Utc>,
    /// Start of the paid period, once converted.
    pub subscription_start: Option<DateTime<Utc>>,
    /// End of the paid period, once converted.
    pub subscription_end: Option<DateTime<Utc>>,
    /// Promo code redeemed at creation.
    pub promo_code: Option<PromoCode>,
    /// Free months granted by the promo code.
    pub promo_months_remaining: u32,
    /// Optimistic concurrency token, bumped by every write.
    pub version: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Returns the trial window.
    #[must_use]
    pub fn trial_window(&self) -> TrialWindow {
        TrialWindow { start: self.trial_start, end: self.trial_end }
    }

    /// Instant access actually lapses: the paid period end, or the trial end.
    #[must_use]
    pub fn access_ends_at(&self) -> DateTime<Utc> {
        self.subscription_end.unwrap_or(self.trial_end)
    }

    /// Returns `true` once the trial was converted to a paid period.
    #[must_use]
    pub fn has_converted(&self) -> bool {
        self.subscription_start.is_some()
    }

    /// Checks the billed-count and price invariants against the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::CorruptRecord`] if the billed count does not fit the tier or
    /// the stored price is stale.
    pub fn check_invariants(&self) -> Result<()> {
        let expected = pricing::compute_price(self.plan_tier, self.billed_child_count)
            .map_err(|e| BillingError::CorruptRecord(e.to_string()))?;
        if expected != self.price {
            return Err(BillingError::CorruptRecord(format!(
                "stale price {} for {} x{} (expected {expected})",
                self.price, self.plan_tier, self.billed_child_count
            )));
        }
        if self.trial_end < self.trial_start {
            return Err(BillingError::CorruptRecord("trial_end precedes trial_start".into()));
        }
        Ok(())
    }
}

/// Kind of state transition recorded in the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    /// Record created.
    Created,
    /// Tier, count, price or status changed.
    Updated,
    /// Subscription cancelled.
    Cancelled,
    /// Paid period started again (conversion or reactivation).
    Renewed,
    /// Trial started.
    TrialStarted,
    /// Child added to the billed household.
    ChildAdded,
    /// Child removed from the billed household.
    ChildRemoved,
}

/// Immutable audit record of one subscription state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Owner of the subscription.
    pub subscription_owner_id: OwnerId,
    /// Transition kind.
    pub action_type: HistoryAction,
    /// Billed child count after the transition.
    pub child_count_at_action: u32,
    /// Monthly price after the transition.
    pub price_at_action: Decimal,
    /// Tier after the transition.
    pub plan_tier_at_action: PlanTierId,
    /// When the transition was committed.
    pub timestamp: DateTime<Utc>,
    /// Free-form note for support review.
    pub notes: Option<String>,
}

impl HistoryEntry {
    /// Captures `subscription` as it stands after a transition.
    #[must_use]
    pub fn capture(subscription: &Subscription, action_type: HistoryAction) -> Self {
        Self {
            subscription_owner_id: subscription.owner_id.clone(),
            action_type,
            child_count_at_action: subscription.billed_child_count,
            price_at_action: subscription.price,
            plan_tier_at_action: subscription.plan_tier,
            timestamp: subscription.updated_at,
            notes: None,
        }
    }

    /// Attaches a note.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Subscription row as returned by the hosted store.
///
/// Every field is loosely typed; use `Subscription::try_from(row)` to validate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRow {
    /// Record identifier.
    pub id: String,
    /// Owner identifier.
    pub owner_id: String,
    /// Tier wire identifier.
    pub plan_tier: String,
    /// Billing period wire identifier.
    pub billing_period: String,
    /// Billed child count.
    pub billed_child_count: i64,
    /// Monthly price as a decimal string.
    pub price: String,
    /// Status wire identifier.
    pub status: String,
    /// Trial start.
    pub trial_start: Option<DateTime<Utc>>,
    /// Trial end.
    pub trial_end: Option<DateTime<Utc>>,
    /// Paid period start.
    pub subscription_start: Option<DateTime<Utc>>,
    /// Paid period end.
    pub subscription_end: Option<DateTime<Utc>>,
    /// Promo code.
    pub promo_code: Option<String>,
    /// Free months granted.
    pub promo_months_remaining: Option<i64>,
    /// Concurrency token.
    pub version: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

fn corrupt(field: &str, detail: impl fmt::Display) -> BillingError {
    BillingError::CorruptRecord(format!("{field}: {detail}"))
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = BillingError;

    fn try_from(row: SubscriptionRow) -> Result<Self> {
        let id = Uuid::parse_str(&row.id).map(SubscriptionId).map_err(|e| corrupt("id", e))?;
        let owner_id = OwnerId::new(row.owner_id).map_err(|e| corrupt("owner_id", e))?;
        let plan_tier: PlanTierId = row.plan_tier.parse().map_err(|e| corrupt("plan_tier", e))?;
        let billed_child_count =
            u32::try_from(row.billed_child_count).map_err(|e| corrupt("billed_child_count", e))?;
        let price = Decimal::from_str(&row.price).map_err(|e| corrupt("price", e))?;
        let promo_code = row
            .promo_code
            .map(PromoCode::new)
            .transpose()
            .map_err(|e| corrupt("promo_code", e))?;
        let promo_months_remaining = u32::try_from(row.promo_months_remaining.unwrap_or(0))
            .map_err(|e| corrupt("promo_months_remaining", e))?;
        let version = u64::try_from(row.version).map_err(|e| corrupt("version", e))?;

        let subscription = Self {
            id,
            owner_id,
            plan_tier,
            billing_period: row.billing_period.parse()?,
            billed_child_count,
            price,
            status: row.status.parse()?,
            trial_start: row.trial_start.ok_or_else(|| corrupt("trial_start", "missing"))?,
            trial_end: row.trial_end.ok_or_else(|| corrupt("trial_end", "missing"))?,
            subscription_start: row.subscription_start,
            subscription_end: row.subscription_end,
            promo_code,
            promo_months_remaining,
            version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        };
        subscription.check_invariants()?;
        Ok(subscription)
    }
}

impl From<&Subscription> for SubscriptionRow {
    fn from(sub: &Subscription) -> Self {
        Self {
            id: sub.id.to_string(),
            owner_id: sub.owner_id.to_string(),
            plan_tier: sub.plan_tier.to_string(),
            billing_period: sub.billing_period.as_str().to_owned(),
            billed_child_count: i64::from(sub.billed_child_count),
            price: sub.price.to_string(),
            status: sub.status.to_string(),
            trial_start: Some(sub.trial_start),
            trial_end: Some(sub.trial_end),
            subscription_start: sub.subscription_start,
            subscription_end: sub.subscription_end,
            promo_code: sub.promo_code.as_ref().map(|code| code.as_str().to_owned()),
            promo_months_remaining: Some(i64::from(sub.promo_months_remaining)),
            version: i64::try_from(sub.version).unwrap_or(i64::MAX),
            created_at: sub.created_at,
            updated_at: sub.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    // ========================================================================
    // Test Helpers
    // ========================================================================

    fn create_test_subscription() -> Subscription {
        let now = Utc::now();
        Subscription {
            id: SubscriptionId::generate(),
            owner_id: OwnerId::new("parent-123").unwrap(),
            plan_tier: PlanTierId::Premium,
            billing_period: BillingPeriod::Monthly,
            billed_child_count: 4,
            price: Decimal::new(600, 2),
            status: SubscriptionStatus::Trial,
            trial_start: now,
            trial_end: now + Duration::days(30),
            subscription_start: None,
            subscription_end: None,
            promo_code: None,
            promo_months_remaining: 0,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    // ========================================================================
    // OwnerId Tests
    // ========================================================================

    #[test]
    fn test_owner_id_valid() {
        let id = OwnerId::new("3f2a9c1e-parent_01").unwrap();
        assert_eq!(id.as_str(), "3f2a9c1e-parent_01");
    }

    #[test]
    fn test_owner_id_rejects_empty_and_symbols() {
        assert!(OwnerId::new("").is_err());
        assert!(OwnerId::new("parent@example.com").is_err());
        assert!(OwnerId::new("a".repeat(65)).is_err());
    }

    #[test]
    fn test_owner_id_deserialize_validates() {
        assert!(serde_json::from_str::<OwnerId>("\"ok-1\"").is_ok());
        assert!(serde_json::from_str::<OwnerId>("\"not ok\"").is_err());
    }

    // ========================================================================
    // Status Transition Tests
    // ========================================================================

    #[test]
    fn test_allowed_transitions() {
        use SubscriptionStatus::{Active, Cancelled, Expired, Trial};

        assert!(Trial.can_transition_to(Active));
        assert!(Trial.can_transition_to(Cancelled));
        assert!(Trial.can_transition_to(Expired));
        assert!(Active.can_transition_to(Cancelled));
        assert!(Active.can_transition_to(Expired));
        assert!(Cancelled.can_transition_to(Active));
        assert!(Cancelled.can_transition_to(Trial));
    }

    #[test]
    fn test_forbidden_transitions() {
        use SubscriptionStatus::{Active, Cancelled, Expired, Trial};

        assert!(!Expired.can_transition_to(Active));
        assert!(!Expired.can_transition_to(Trial));
        assert!(!Active.can_transition_to(Trial));
        assert!(!Cancelled.can_transition_to(Expired));
        assert!(!Cancelled.can_transition_to(Cancelled));
    }

    // ========================================================================
    // Subscription Tests
    // ========================================================================

    #[test]
    fn test_access_ends_at_prefers_paid_period() {
        let mut sub = create_test_subscription();
        assert_eq!(sub.access_ends_at(), sub.trial_end);

        let end = sub.trial_end + Duration::days(31);
        sub.subscription_start = Some(sub.trial_end);
        sub.subscription_end = Some(end);
        assert_eq!(sub.access_ends_at(), end);
        assert!(sub.has_converted());
    }

    #[test]
    fn test_period_end_yearly() {
        let start = DateTime::parse_from_rfc3339("2026-01-31T00:00:00Z").unwrap().to_utc();
        let end = BillingPeriod::Yearly.period_end(start);
        assert_eq!(end, DateTime::parse_from_rfc3339("2027-01-31T00:00:00Z").unwrap().to_utc());
    }

    #[test]
    fn test_history_capture() {
        let sub = create_test_subscription();
        let entry = HistoryEntry::capture(&sub, HistoryAction::TrialStarted).with_notes("hello");
        assert_eq!(entry.child_count_at_action, 4);
        assert_eq!(entry.price_at_action, Decimal::new(600, 2));
        assert_eq!(entry.plan_tier_at_action, PlanTierId::Premium);
        assert_eq!(entry.notes.as_deref(), Some("hello"));
    }

    // ========================================================================
    // Row Validation Tests
    // ========================================================================

    #[test]
    fn test_row_conversion_preserves_record() {
        let sub = create_test_subscription();
        let row = SubscriptionRow::from(&sub);
        assert_eq!(Subscription::try_from(row).unwrap(), sub);
    }

    #[test]
    fn test_row_with_unknown_status_is_corrupt() {
        let mut row = SubscriptionRow::from(&create_test_subscription());
        row.status = "paused".into();
        assert!(matches!(Subscription::try_from(row), Err(BillingError::CorruptRecord(_))));
    }

    #[test]
    fn test_row_missing_trial_end_is_corrupt() {
        let mut row = SubscriptionRow::from(&create_test_subscription());
        row.trial_end = None;
        let err = Subscription::try_from(row).unwrap_err();
        assert!(err.to_string().contains("trial_end"));
    }

    #[test]
    fn test_row_with_stale_price_is_corrupt() {
        let mut row = SubscriptionRow::from(&create_test_subscription());
        row.price = "5.00".into();
        let err = Subscription::try_from(row).unwrap_err();
        assert!(err.to_string().contains("stale price"));
    }

    #[test]
    fn test_row_with_capped_overcount_is_corrupt() {
        let mut row = SubscriptionRow::from(&create_test_subscription());
        row.billed_child_count = 5;
        assert!(matches!(Subscription::try_from(row), Err(BillingError::CorruptRecord(_))));
    }

    #[test]
    fn test_row_with_negative_count_is_corrupt() {
        let mut row = SubscriptionRow::from(&create_test_subscription());
        row.billed_child_count = -1;
        let err = Subscription::try_from(row).unwrap_err();
        assert!(err.to_string().contains("billed_child_count"));
    }
}
