//! Error types for the PioPi billing engine.
//!
//! All errors implement the standard [`std::error::Error`] trait via [`thiserror::Error`].
//! Every variant is a tagged kind so callers can branch on it; turning an error into a
//! user-facing message is the UI layer's job.
//!
//! # Error Categories
//!
//! - **Validation errors** ([`BillingError::UnknownTier`], [`BillingError::InvalidChildCount`],
//!   [`BillingError::InvalidOwnerId`], [`BillingError::InvalidPromoCode`]): rejected before any
//!   persistence attempt
//! - **State errors** ([`BillingError::InvalidTransition`],
//!   [`BillingError::DuplicateSubscription`], [`BillingError::SubscriptionNotFound`],
//!   [`BillingError::UpgradeRequired`]): rejected with no partial writes
//! - **Storage errors** ([`BillingError::VersionConflict`], [`BillingError::CorruptRecord`],
//!   [`BillingError::Storage`])
//! - **Collaborator errors** ([`BillingError::PromoValidator`], [`BillingError::Notification`],
//!   [`BillingError::Timeout`], [`BillingError::CircuitOpen`]): never roll back a committed
//!   mutation, they surface as [`Warning`](crate::lifecycle::Warning)s instead
//!
//! # Examples
//!
//! ```
//! use piopi_billing::{
//!     catalog::PlanTierId,
//!     error::{BillingError, Result},
//! };
//!
//! fn parse(tier: &str) -> Result<PlanTierId> {
//!     tier.parse()
//! }
//!
//! assert!(matches!(parse("gold"), Err(BillingError::UnknownTier(_))));
//! ```

use thiserror::Error;

use crate::{catalog::PlanTierId, subscription::SubscriptionStatus};

/// Result type alias for billing operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur in the billing engine.
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum BillingError {
    /// Tier id is not one of the five catalog tiers.
    #[error("unknown plan tier: {0}")]
    UnknownTier(String),

    /// Billed child count does not fit the tier.
    ///
    /// For capped tiers the billed count is pinned to the included children; for the
    /// uncapped tier it can never drop below them. Either way this signals a caller bug.
    #[error("invalid child count {count} for tier {tier} (expected {expected})")]
    InvalidChildCount {
        /// Tier the price was requested for.
        tier: PlanTierId,
        /// Count supplied by the caller.
        count: u32,
        /// Human readable constraint, e.g. `"exactly 4"` or `"at least 5"`.
        expected: String,
    },

    /// The household outgrew a capped tier and the parent must change tier explicitly.
    #[error("tier {tier} includes {included} children, {requested} requested: upgrade required")]
    UpgradeRequired {
        /// Current tier.
        tier: PlanTierId,
        /// Children included by the tier.
        included: u32,
        /// Child count that triggered the wall.
        requested: u32,
    },

    /// Owner already holds a subscription.
    #[error("owner {0} already has a subscription")]
    DuplicateSubscription(String),

    /// Owner has no subscription.
    #[error("no subscription found for owner {0}")]
    SubscriptionNotFound(String),

    /// Operation is not permitted from the current status.
    #[error("cannot {action} a subscription in status {from}")]
    InvalidTransition {
        /// Status the subscription was in.
        from: SubscriptionStatus,
        /// Operation that was attempted.
        action: &'static str,
    },

    /// Conditional write lost a race against a concurrent writer.
    #[error("subscription for owner {owner_id} changed concurrently (expected version {expected:?})")]
    VersionConflict {
        /// Owner whose record changed.
        owner_id: String,
        /// Version the writer expected to replace.
        expected: Option<u64>,
    },

    /// Stored record failed validation at the storage boundary.
    #[error("corrupt subscription record: {0}")]
    CorruptRecord(String),

    /// Owner id failed validation.
    #[error("invalid owner id: {0}")]
    InvalidOwnerId(String),

    /// Promo code failed format validation.
    #[error("invalid promo code: {0}")]
    InvalidPromoCode(String),

    /// Storage collaborator failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Promo validator collaborator failed.
    #[error("promo validator error: {0}")]
    PromoValidator(String),

    /// Notification dispatcher failed.
    #[error("notification error: {0}")]
    Notification(String),

    /// External call exceeded its deadline.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Name of the call that timed out.
        operation: &'static str,
        /// Deadline in milliseconds.
        timeout_ms: u64,
    },

    /// Circuit breaker is open for a collaborator.
    #[error("circuit breaker open: {0}")]
    CircuitOpen(&'static str),

    /// Actor lacks the role required for the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl BillingError {
    /// Returns `true` for input validation errors.
    #[must_use]
    pub const fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownTier(_)
                | Self::InvalidChildCount { .. }
                | Self::InvalidOwnerId(_)
                | Self::InvalidPromoCode(_)
        )
    }

    /// Returns `true` for errors caused by the subscription's current state.
    #[must_use]
    pub const fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. }
                | Self::DuplicateSubscription(_)
                | Self::SubscriptionNotFound(_)
                | Self::UpgradeRequired { .. }
        )
    }

    /// Returns `true` for failures of the promo validator or notification dispatcher.
    #[must_use]
    pub const fn is_collaborator_error(&self) -> bool {
        matches!(
            self,
            Self::PromoValidator(_)
                | Self::Notification(_)
                | Self::Timeout { .. }
                | Self::CircuitOpen(_)
        )
    }
}
