//! Subscription lifecycle state machine.
//!
//! [`SubscriptionLifecycle`] owns every state transition of a parent's subscription. Each
//! mutation follows the same shape:
//!
//! 1. read the record (and, where relevant, the household size) fresh from storage
//! 2. compute the next record with the pricing engine and trial policy
//! 3. write it conditionally on the version that was read, re-running from step 1 after a
//!    version conflict
//! 4. append the history entry
//! 5. dispatch the notification under a deadline and circuit breaker
//!
//! Steps 4 and 5 happen after the write has committed. Their failures are reported as
//! [`Warning`]s on the returned [`LifecycleOutcome`] and never undo the mutation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    catalog::{self, OverflowPolicy, PlanTierId},
    error::{BillingError, Result},
    notify::{NotificationEvent, Notifier},
    pricing::{self, Quote},
    promo::{PromoCode, PromoOutcome, PromoValidator},
    reliability::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy, retry_with_backoff, with_timeout},
    storage::SubscriptionStore,
    subscription::{
        BillingPeriod, HistoryAction, HistoryEntry, OwnerId, Subscription, SubscriptionId,
        SubscriptionStatus,
    },
    trial::TrialPolicy,
};

/// Lifecycle settings.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Trial length policy.
    pub trial: TrialPolicy,
    /// Deadline for each promo validator call.
    pub promo_timeout: Duration,
    /// Deadline for each notification dispatch.
    pub notify_timeout: Duration,
    /// Retries after a version conflict.
    pub conflict_retry: RetryPolicy,
    /// Notification dispatcher circuit breaker.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl LifecycleConfig {
    /// Settings with the given trial policy and default collaborator limits.
    #[must_use]
    pub fn new(trial: TrialPolicy) -> Self {
        Self {
            trial,
            promo_timeout: Duration::from_secs(3),
            notify_timeout: Duration::from_secs(3),
            conflict_retry: RetryPolicy::with_retries(5),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Degraded collaborator call attached to a successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// The history entry could not be appended.
    HistoryNotRecorded {
        /// Action of the lost entry.
        action: HistoryAction,
        /// Failure description.
        reason: String,
    },
    /// The notification could not be dispatched.
    NotificationFailed {
        /// Event kind.
        event: &'static str,
        /// Failure description.
        reason: String,
    },
    /// The promo validator could not be reached; the trial has no bonus.
    PromoUnavailable {
        /// Code that could not be checked.
        code: PromoCode,
        /// Failure description.
        reason: String,
    },
    /// The bonus was applied but the redemption was not counted.
    PromoUsageNotRecorded {
        /// Redeemed code.
        code: PromoCode,
        /// Failure description.
        reason: String,
    },
}

/// Result of a lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleOutcome {
    /// Record as stored after the operation.
    pub subscription: Subscription,
    /// Side effects that did not complete.
    pub warnings: Vec<Warning>,
    /// Fate of the promo code, for trial creation only.
    pub promo: Option<PromoOutcome>,
}

impl LifecycleOutcome {
    /// Returns `true` if every side effect completed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// A record change with its side effects.
#[derive(Debug)]
pub(crate) struct Change {
    pub(crate) next: Subscription,
    pub(crate) action: HistoryAction,
    pub(crate) note: Option<String>,
    pub(crate) event: Option<NotificationEvent>,
}

impl Change {
    pub(crate) const fn new(next: Subscription, action: HistoryAction) -> Self {
        Self { next, action, note: None, event: None }
    }

    pub(crate) fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub(crate) fn notify(mut self, event: NotificationEvent) -> Self {
        self.event = Some(event);
        self
    }
}

/// Subscription state machine over storage, promo and notification collaborators.
#[derive(Debug)]
pub struct SubscriptionLifecycle<S, P, N> {
    store: S,
    promo: P,
    notifier: N,
    config: LifecycleConfig,
    notify_breaker: CircuitBreaker,
}

impl<S, P, N> SubscriptionLifecycle<S, P, N>
where
    S: SubscriptionStore,
    P: PromoValidator,
    N: Notifier,
{
    /// Wires the lifecycle to its collaborators.
    #[must_use]
    pub fn new(store: S, promo: P, notifier: N, config: LifecycleConfig) -> Self {
        let notify_breaker = CircuitBreaker::new("notifier", config.circuit_breaker.clone());
        Self { store, promo, notifier, config, notify_breaker }
    }

    /// Storage collaborator.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Promo validator collaborator.
    pub const fn promo_validator(&self) -> &P {
        &self.promo
    }

    /// Notification collaborator.
    pub const fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Active settings.
    pub const fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Starts a trial for `owner` on `tier`.
    ///
    /// The billed count is the tier's included children. A promo code is validated once;
    /// a rejected or unreachable code still creates the trial, without bonus, and the
    /// outcome says why. Usage is counted only after the record with the bonus is stored.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::DuplicateSubscription`] if `owner` already has a record,
    /// whatever its status.
    #[instrument(skip(self, owner, promo_code), fields(owner_id = %owner))]
    pub async fn create_trial_subscription(
        &self,
        owner: &OwnerId,
        tier: PlanTierId,
        billing_period: BillingPeriod,
        promo_code: Option<PromoCode>,
    ) -> Result<LifecycleOutcome> {
        if self.store.get_subscription(owner).await?.is_some() {
            return Err(BillingError::DuplicateSubscription(owner.to_string()));
        }

        let mut warnings = Vec::new();
        let promo = match promo_code {
            Some(code) => Some(self.check_promo(code, &mut warnings).await),
            None => None,
        };
        let free_months = promo.as_ref().map_or(0, PromoOutcome::free_months);

        let billed = pricing::billed_child_count(tier, 0);
        let now = Utc::now();
        let window = self.config.trial.window(now, free_months);
        let mut subscription = Subscription {
            id: SubscriptionId::generate(),
            owner_id: owner.clone(),
            plan_tier: tier,
            billing_period,
            billed_child_count: billed,
            price: pricing::compute_price(tier, billed)?,
            status: SubscriptionStatus::Trial,
            trial_start: window.start,
            trial_end: window.end,
            subscription_start: None,
            subscription_end: None,
            promo_code: match &promo {
                Some(PromoOutcome::Applied { code, .. }) => Some(code.clone()),
                _ => None,
            },
            promo_months_remaining: free_months,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        subscription.version = self.store.put_subscription(&subscription, None).await?;
        info!(
            trial_end = %subscription.trial_end,
            price = %subscription.price,
            free_months,
            "trial subscription created"
        );

        if let Some(PromoOutcome::Applied { code, .. }) = &promo
            && let Err(e) = self.promo.increment_usage(code).await
        {
            warn!(code = %code, error = %e, "promo usage not recorded");
            warnings.push(Warning::PromoUsageNotRecorded { code: code.clone(), reason: e.to_string() });
        }

        let event = NotificationEvent::TrialStarted {
            owner_id: owner.clone(),
            tier,
            trial_end: subscription.trial_end,
            price: subscription.price,
        };
        self.record_history(HistoryEntry::capture(&subscription, HistoryAction::TrialStarted), &mut warnings)
            .await;
        self.dispatch(event, &mut warnings).await;

        Ok(LifecycleOutcome { subscription, warnings, promo })
    }

    /// Accounts for a newly created child profile.
    ///
    /// The household size is the larger of `current_actual_child_count` and the count held
    /// by storage, re-read on every attempt. Capped tiers refuse to grow past their cap;
    /// the uncapped tier bills the new size and notifies the parent of the new price.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::UpgradeRequired`] when a capped tier is outgrown, leaving the
    /// record unchanged, or [`BillingError::InvalidTransition`] unless the subscription is
    /// in trial or active.
    #[instrument(skip(self, owner), fields(owner_id = %owner))]
    pub async fn add_child_to_household(
        &self,
        owner: &OwnerId,
        current_actual_child_count: u32,
    ) -> Result<LifecycleOutcome> {
        self.transition(owner, true, |current, stored_children, now| {
            require_live(current, "add a child to")?;
            let household = current_actual_child_count.max(stored_children.unwrap_or(0));
            let tier = catalog::plan(current.plan_tier);

            match tier.on_overflow {
                OverflowPolicy::Block if household > tier.included_children => {
                    Err(BillingError::UpgradeRequired {
                        tier: tier.id,
                        included: tier.included_children,
                        requested: household,
                    })
                }
                OverflowPolicy::Block => Ok(None),
                OverflowPolicy::Autobill => {
                    let billed = pricing::billed_child_count(tier.id, household);
                    if billed <= current.billed_child_count {
                        return Ok(None);
                    }
                    rebill(current, tier.id, billed, now, HistoryAction::Updated).map(Some)
                }
            }
        })
        .await
    }

    /// Accounts for a deleted child profile.
    ///
    /// Only the uncapped tier lowers its billed count, never below the included children.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::InvalidTransition`] unless the subscription is in trial or
    /// active.
    #[instrument(skip(self, owner), fields(owner_id = %owner))]
    pub async fn remove_child_from_household(
        &self,
        owner: &OwnerId,
        current_actual_child_count: u32,
    ) -> Result<LifecycleOutcome> {
        self.transition(owner, true, |current, stored_children, now| {
            require_live(current, "remove a child from")?;
            let tier = catalog::plan(current.plan_tier);
            if tier.is_capped() {
                return Ok(None);
            }
            let household = current_actual_child_count.max(stored_children.unwrap_or(0));
            let billed = pricing::billed_child_count(tier.id, household);
            if billed >= current.billed_child_count {
                return Ok(None);
            }
            rebill(current, tier.id, billed, now, HistoryAction::ChildRemoved).map(Some)
        })
        .await
    }

    /// Moves the subscription to `new_tier`, billing `actual_child_count` children.
    ///
    /// The caller decides whether a downgrade below the household size is acceptable.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::InvalidTransition`] unless the subscription is in trial or
    /// active.
    #[instrument(skip(self, owner), fields(owner_id = %owner))]
    pub async fn change_tier(
        &self,
        owner: &OwnerId,
        new_tier: PlanTierId,
        actual_child_count: u32,
    ) -> Result<LifecycleOutcome> {
        self.transition(owner, false, |current, _, now| {
            require_live(current, "change the tier of")?;
            let billed = pricing::billed_child_count(new_tier, actual_child_count);
            if new_tier == current.plan_tier && billed == current.billed_child_count {
                return Ok(None);
            }
            rebill(current, new_tier, billed, now, HistoryAction::Updated).map(Some)
        })
        .await
    }

    /// Cancels the subscription. Access runs until [`Subscription::access_ends_at`].
    ///
    /// Cancelling a cancelled or expired subscription succeeds without writing anything.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::SubscriptionNotFound`] if `owner` has no record.
    #[instrument(skip(self, owner), fields(owner_id = %owner))]
    pub async fn cancel(&self, owner: &OwnerId) -> Result<LifecycleOutcome> {
        self.transition(owner, false, |current, _, now| {
            if !current.status.is_live() {
                return Ok(None);
            }
            let mut next = current.clone();
            next.status = SubscriptionStatus::Cancelled;
            next.updated_at = now;
            let event = NotificationEvent::Cancelled {
                owner_id: next.owner_id.clone(),
                access_ends_at: next.access_ends_at(),
            };
            Ok(Some(Change::new(next, HistoryAction::Cancelled).notify(event)))
        })
        .await
    }

    /// Reactivates a cancelled subscription.
    ///
    /// A never-converted record whose original trial window is still open goes back to
    /// trial. Otherwise it becomes active, starting a fresh paid period if the previous
    /// one has lapsed.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::InvalidTransition`] unless the subscription is cancelled.
    #[instrument(skip(self, owner), fields(owner_id = %owner))]
    pub async fn reactivate(&self, owner: &OwnerId) -> Result<LifecycleOutcome> {
        self.transition(owner, false, |current, _, now| {
            if current.status != SubscriptionStatus::Cancelled {
                return Err(invalid(current, "reactivate"));
            }
            let mut next = current.clone();
            next.updated_at = now;
            if !current.has_converted() && current.trial_window().contains(now) {
                next.status = SubscriptionStatus::Trial;
            } else {
                next.status = SubscriptionStatus::Active;
                if current.access_ends_at() <= now {
                    start_period(&mut next, now);
                }
            }
            Ok(Some(reactivated(next)))
        })
        .await
    }

    /// Marks a lapsed subscription expired. Intended for the time-based sweep.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::InvalidTransition`] unless the subscription is in trial or
    /// active and its access end date has passed.
    #[instrument(skip(self, owner), fields(owner_id = %owner))]
    pub async fn expire(&self, owner: &OwnerId) -> Result<LifecycleOutcome> {
        self.transition(owner, false, |current, _, now| {
            require_live(current, "expire")?;
            let ends = current.access_ends_at();
            if now <= ends {
                return Err(invalid(current, "expire"));
            }
            let mut next = current.clone();
            next.status = SubscriptionStatus::Expired;
            next.updated_at = now;
            Ok(Some(
                Change::new(next, HistoryAction::Updated)
                    .note(format!("expired: access ended {}", ends.to_rfc3339())),
            ))
        })
        .await
    }

    /// Converts a trial into a paid subscription starting now.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::InvalidTransition`] unless the subscription is in trial.
    #[instrument(skip(self, owner), fields(owner_id = %owner))]
    pub async fn activate(&self, owner: &OwnerId) -> Result<LifecycleOutcome> {
        self.transition(owner, false, |current, _, now| {
            if current.status != SubscriptionStatus::Trial {
                return Err(invalid(current, "activate"));
            }
            let mut next = current.clone();
            next.status = SubscriptionStatus::Active;
            next.updated_at = now;
            start_period(&mut next, now);
            Ok(Some(Change::new(next, HistoryAction::Renewed).note("trial converted")))
        })
        .await
    }

    /// Loads the subscription of `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::SubscriptionNotFound`] if `owner` has no record.
    pub async fn get_subscription(&self, owner: &OwnerId) -> Result<Subscription> {
        self.store
            .get_subscription(owner)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(owner.to_string()))
    }

    /// Quotes the current subscription's tier, billed count and period.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::SubscriptionNotFound`] if `owner` has no record.
    pub async fn quote_for(&self, owner: &OwnerId) -> Result<Quote> {
        let subscription = self.get_subscription(owner).await?;
        pricing::quote(
            subscription.plan_tier,
            subscription.billed_child_count,
            subscription.billing_period,
        )
    }

    /// Runs one read-compute-write cycle, retried on version conflicts, then records the
    /// history entry and dispatches the notification.
    ///
    /// `plan` receives the current record, the stored household size when
    /// `with_children` is set, and the instant of the attempt. Returning `Ok(None)` leaves
    /// the record untouched and skips both side effects.
    pub(crate) async fn transition<F>(
        &self,
        owner: &OwnerId,
        with_children: bool,
        plan: F,
    ) -> Result<LifecycleOutcome>
    where
        F: Fn(&Subscription, Option<u32>, DateTime<Utc>) -> Result<Option<Change>> + Sync,
    {
        let plan = &plan;
        let (subscription, change) = retry_with_backoff(&self.config.conflict_retry, move || async move {
            let current = self.get_subscription(owner).await?;
            let children = if with_children {
                Some(self.store.count_children(owner).await?)
            } else {
                None
            };

            let Some(mut change) = plan(&current, children, Utc::now())? else {
                debug!(status = %current.status, "no change to write");
                return Ok::<_, BillingError>((current, None));
            };
            change.next.version =
                self.store.put_subscription(&change.next, Some(current.version)).await?;
            Ok::<_, BillingError>((change.next.clone(), Some(change)))
        })
        .await?;

        let mut warnings = Vec::new();
        if let Some(change) = change {
            info!(
                action = ?change.action,
                status = %subscription.status,
                tier = %subscription.plan_tier,
                billed_child_count = subscription.billed_child_count,
                price = %subscription.price,
                "subscription updated"
            );
            let mut entry = HistoryEntry::capture(&subscription, change.action);
            entry.notes = change.note;
            self.record_history(entry, &mut warnings).await;
            if let Some(event) = change.event {
                self.dispatch(event, &mut warnings).await;
            }
        }

        Ok(LifecycleOutcome { subscription, warnings, promo: None })
    }

    async fn check_promo(&self, code: PromoCode, warnings: &mut Vec<Warning>) -> PromoOutcome {
        match with_timeout("promo validation", self.config.promo_timeout, self.promo.validate(&code))
            .await
        {
            Ok(validation) if validation.valid => {
                PromoOutcome::Applied { code, free_months: validation.free_months.unwrap_or(0) }
            }
            Ok(validation) => {
                info!(code = %code, message = ?validation.message, "promo code rejected");
                PromoOutcome::Rejected { code, message: validation.message }
            }
            Err(e) => {
                warn!(code = %code, error = %e, "promo validator unavailable");
                warnings.push(Warning::PromoUnavailable { code: code.clone(), reason: e.to_string() });
                PromoOutcome::Unavailable { code, reason: e.to_string() }
            }
        }
    }

    async fn record_history(&self, entry: HistoryEntry, warnings: &mut Vec<Warning>) {
        let action = entry.action_type;
        if let Err(e) = self.store.append_history(entry).await {
            warn!(action = ?action, error = %e, "history entry not recorded");
            warnings.push(Warning::HistoryNotRecorded { action, reason: e.to_string() });
        }
    }

    async fn dispatch(&self, event: NotificationEvent, warnings: &mut Vec<Warning>) {
        let timeout = self.config.notify_timeout;
        let result = self
            .notify_breaker
            .call(|| with_timeout("notification", timeout, self.notifier.notify(&event)))
            .await;
        if let Err(e) = result {
            warn!(event = event.kind(), error = %e, "notification not delivered");
            warnings.push(Warning::NotificationFailed { event: event.kind(), reason: e.to_string() });
        }
    }
}

fn invalid(current: &Subscription, action: &'static str) -> BillingError {
    BillingError::InvalidTransition { from: current.status, action }
}

fn require_live(current: &Subscription, action: &'static str) -> Result<()> {
    if current.status.is_live() { Ok(()) } else { Err(invalid(current, action)) }
}

/// Starts a paid period of the record's billing period at `now`.
pub(crate) fn start_period(next: &mut Subscription, now: DateTime<Utc>) {
    next.subscription_start = Some(now);
    next.subscription_end = Some(next.billing_period.period_end(now));
}

pub(crate) fn reactivated(next: Subscription) -> Change {
    let event = NotificationEvent::Reactivated {
        owner_id: next.owner_id.clone(),
        status: next.status,
        access_ends_at: next.access_ends_at(),
    };
    Change::new(next, HistoryAction::Renewed).notify(event)
}

/// Reprices `current` onto `tier` with `billed` children.
pub(crate) fn rebill(
    current: &Subscription,
    tier: PlanTierId,
    billed: u32,
    now: DateTime<Utc>,
    action: HistoryAction,
) -> Result<Change> {
    let price = pricing::compute_price(tier, billed)?;
    let mut next = current.clone();
    next.plan_tier = tier;
    next.billed_child_count = billed;
    next.price = price;
    next.updated_at = now;

    let event = NotificationEvent::PlanChanged {
        owner_id: next.owner_id.clone(),
        old_tier: current.plan_tier,
        new_tier: tier,
        old_price: current.price,
        new_price: price,
        billed_child_count: billed,
    };
    let note = if tier == current.plan_tier {
        format!(
            "billed children {} -> {} ({:+}), price {} -> {}",
            current.billed_child_count,
            billed,
            i64::from(billed) - i64::from(current.billed_child_count),
            current.price,
            price
        )
    } else {
        format!(
            "tier {} -> {}, billed children {} -> {}, price {} -> {}",
            current.plan_tier, tier, current.billed_child_count, billed, current.price, price
        )
    };
    Ok(Change::new(next, action).note(note).notify(event))
}
