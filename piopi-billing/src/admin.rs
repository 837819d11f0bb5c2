//! Privileged operations.
//!
//! Role-checked wrappers around the lifecycle for support staff: cancelling on behalf of
//! a parent, overriding tier, period or end date, and reviving expired subscriptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    catalog::PlanTierId,
    error::{BillingError, Result},
    lifecycle::{self, Change, LifecycleOutcome, SubscriptionLifecycle},
    notify::{NotificationEvent, Notifier},
    pricing,
    promo::PromoValidator,
    storage::SubscriptionStore,
    subscription::{BillingPeriod, HistoryAction, OwnerId, SubscriptionStatus},
};

/// Role of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Account holder acting on their own subscription.
    Parent,
    /// Support staff.
    Admin,
}

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Caller's account id.
    pub id: OwnerId,
    /// Caller's role.
    pub role: Role,
}

impl Actor {
    /// A parent acting for themselves.
    #[must_use]
    pub const fn parent(id: OwnerId) -> Self {
        Self { id, role: Role::Parent }
    }

    /// A support admin.
    #[must_use]
    pub const fn admin(id: OwnerId) -> Self {
        Self { id, role: Role::Admin }
    }

    /// Returns `true` for admins.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(BillingError::Forbidden(format!("{} is not an admin", self.id)))
        }
    }
}

/// Fields an admin may override. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUpdate {
    /// New tier.
    pub tier: Option<PlanTierId>,
    /// New billing period.
    pub billing_period: Option<BillingPeriod>,
    /// Household size to bill.
    pub actual_child_count: Option<u32>,
    /// New paid period end.
    pub subscription_end: Option<DateTime<Utc>>,
}

impl<S, P, N> SubscriptionLifecycle<S, P, N>
where
    S: SubscriptionStore,
    P: PromoValidator,
    N: Notifier,
{
    /// Cancels `owner`'s subscription on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::Forbidden`] if a parent targets another account, otherwise
    /// as [`cancel`](Self::cancel).
    #[instrument(skip(self, actor, owner), fields(actor = %actor.id, owner_id = %owner))]
    pub async fn cancel_as(&self, actor: &Actor, owner: &OwnerId) -> Result<LifecycleOutcome> {
        if !actor.is_admin() && actor.id != *owner {
            return Err(BillingError::Forbidden(format!(
                "{} cannot cancel the subscription of {owner}",
                actor.id
            )));
        }
        self.cancel(owner).await
    }

    /// Overrides tier, period, household size or end date.
    ///
    /// Billed count and price are recomputed. A cancelled record stays cancelled; use
    /// [`admin_reactivate`](Self::admin_reactivate) to revive it. Otherwise the status is
    /// derived from the dates: `expired` once the end has passed, `trial` while a
    /// never-converted trial is still open, `active` otherwise. Promoting a never-converted
    /// record to `active` starts a paid period now.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::Forbidden`] unless `actor` is an admin.
    #[instrument(skip(self, actor, owner), fields(actor = %actor.id, owner_id = %owner))]
    pub async fn admin_update(
        &self,
        actor: &Actor,
        owner: &OwnerId,
        update: AdminUpdate,
    ) -> Result<LifecycleOutcome> {
        actor.require_admin()?;
        let note = format!("admin update by {}", actor.id);

        self.transition(owner, false, |current, _, now| {
            let tier = update.tier.unwrap_or(current.plan_tier);
            let household = update.actual_child_count.unwrap_or(current.billed_child_count);
            let billed = pricing::billed_child_count(tier, household);
            let price = pricing::compute_price(tier, billed)?;

            let mut next = current.clone();
            next.plan_tier = tier;
            next.billed_child_count = billed;
            next.price = price;
            next.billing_period = update.billing_period.unwrap_or(current.billing_period);
            next.subscription_end = update.subscription_end.or(current.subscription_end);
            next.updated_at = now;

            next.status = if current.status == SubscriptionStatus::Cancelled {
                SubscriptionStatus::Cancelled
            } else if next.subscription_end.is_some_and(|end| end <= now) {
                SubscriptionStatus::Expired
            } else if !next.has_converted() && next.trial_window().contains(now) {
                SubscriptionStatus::Trial
            } else {
                SubscriptionStatus::Active
            };
            if next.status == SubscriptionStatus::Active && !next.has_converted() {
                next.subscription_start = Some(now);
                if next.subscription_end.is_none() {
                    next.subscription_end = Some(next.billing_period.period_end(now));
                }
            }

            let mut change = Change::new(next, HistoryAction::Updated).note(note.clone());
            if tier != current.plan_tier || price != current.price {
                change = change.notify(NotificationEvent::PlanChanged {
                    owner_id: current.owner_id.clone(),
                    old_tier: current.plan_tier,
                    new_tier: tier,
                    old_price: current.price,
                    new_price: price,
                    billed_child_count: billed,
                });
            }
            info!(status = %change.next.status, "admin override computed");
            Ok(Some(change))
        })
        .await
    }

    /// Revives a cancelled or expired subscription with a fresh paid period.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::Forbidden`] unless `actor` is an admin, and
    /// [`BillingError::InvalidTransition`] if the subscription is still live.
    #[instrument(skip(self, actor, owner), fields(actor = %actor.id, owner_id = %owner))]
    pub async fn admin_reactivate(&self, actor: &Actor, owner: &OwnerId) -> Result<LifecycleOutcome> {
        actor.require_admin()?;

        self.transition(owner, false, |current, _, now| {
            if current.status.is_live() {
                return Err(BillingError::InvalidTransition {
                    from: current.status,
                    action: "reactivate",
                });
            }
            let mut next = current.clone();
            next.status = SubscriptionStatus::Active;
            next.updated_at = now;
            lifecycle::start_period(&mut next, now);
            Ok(Some(lifecycle::reactivated(next)))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_roles() {
        let parent = Actor::parent(OwnerId::new("p-1").unwrap());
        let admin = Actor::admin(OwnerId::new("support-7").unwrap());

        assert!(!parent.is_admin());
        assert!(admin.is_admin());
        assert!(matches!(parent.require_admin(), Err(BillingError::Forbidden(_))));
        assert!(admin.require_admin().is_ok());
    }

    #[test]
    fn test_admin_update_deserializes_partial() {
        let update: AdminUpdate = serde_json::from_str(r#"{"tier":"liberte"}"#).unwrap();
        assert_eq!(update.tier, Some(PlanTierId::Liberte));
        assert!(update.billing_period.is_none());
        assert!(update.subscription_end.is_none());
    }
}
