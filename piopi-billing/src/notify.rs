//! Notification dispatch.
//!
//! The lifecycle emits one [`NotificationEvent`] per committed user-visible transition.
//! Delivery is best effort: a failing [`Notifier`] never rolls back a mutation.

#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    catalog::PlanTierId,
    error::Result,
    subscription::{OwnerId, SubscriptionStatus},
};

/// Subscription events delivered to the parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// A trial was created.
    TrialStarted {
        /// Subscription owner.
        owner_id: OwnerId,
        /// Trial tier.
        tier: PlanTierId,
        /// Trial end, including any promo extension.
        trial_end: DateTime<Utc>,
        /// Monthly price charged once the trial ends.
        price: Decimal,
    },
    /// Tier, billed count or price changed.
    PlanChanged {
        /// Subscription owner.
        owner_id: OwnerId,
        /// Tier before the change.
        old_tier: PlanTierId,
        /// Tier after the change.
        new_tier: PlanTierId,
        /// Monthly price before the change.
        old_price: Decimal,
        /// Monthly price after the change.
        new_price: Decimal,
        /// Billed child count after the change.
        billed_child_count: u32,
    },
    /// The subscription was cancelled.
    Cancelled {
        /// Subscription owner.
        owner_id: OwnerId,
        /// Access remains until this instant.
        access_ends_at: DateTime<Utc>,
    },
    /// A cancelled or expired subscription was reactivated.
    Reactivated {
        /// Subscription owner.
        owner_id: OwnerId,
        /// Status after reactivation.
        status: SubscriptionStatus,
        /// Access runs until this instant.
        access_ends_at: DateTime<Utc>,
    },
}

impl NotificationEvent {
    /// Owner the event is addressed to.
    #[must_use]
    pub const fn owner_id(&self) -> &OwnerId {
        match self {
            Self::TrialStarted { owner_id, .. }
            | Self::PlanChanged { owner_id, .. }
            | Self::Cancelled { owner_id, .. }
            | Self::Reactivated { owner_id, .. } => owner_id,
        }
    }

    /// Event name as serialized in the `type` tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TrialStarted { .. } => "trial_started",
            Self::PlanChanged { .. } => "plan_changed",
            Self::Cancelled { .. } => "cancelled",
            Self::Reactivated { .. } => "reactivated",
        }
    }
}

/// Notification dispatcher collaborator.
pub trait Notifier: Send + Sync {
    /// Dispatches `event`.
    ///
    /// # Errors
    ///
    /// Returns error if the dispatcher rejects or cannot deliver the event.
    fn notify<'a>(&'a self, event: &'a NotificationEvent)
    -> impl Future<Output = Result<()>> + Send + 'a;
}

/// Development dispatcher that writes events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify<'a>(&'a self, event: &'a NotificationEvent) -> Result<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| crate::error::BillingError::Notification(e.to_string()))?;
        info!(
            owner_id = %event.owner_id(),
            event = event.kind(),
            payload = %payload,
            "subscription notification"
        );
        Ok(())
    }
}
