//! Shared collaborators and fixtures for lifecycle integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset of helpers")]

use std::{
    sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use piopi_billing::{
    BillingError, LifecycleConfig, Result, SubscriptionLifecycle,
    notify::{NotificationEvent, Notifier},
    promo::{PromoCode, PromoDefinition, PromoValidation, PromoValidator, StaticPromoValidator},
    storage::{MemoryStore, SubscriptionStore},
    subscription::{HistoryEntry, OwnerId, Subscription, SubscriptionRow},
    trial::TrialPolicy,
};

// ============================================================================
// Notifiers
// ============================================================================

/// Keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(NotificationEvent::kind).collect()
    }
}

impl Notifier for RecordingNotifier {
    async fn notify<'a>(&'a self, event: &'a NotificationEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Rejects every event and counts the attempts that reached it.
#[derive(Debug, Default)]
pub struct FailingNotifier {
    pub calls: AtomicU32,
}

impl Notifier for FailingNotifier {
    async fn notify<'a>(&'a self, _event: &'a NotificationEvent) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BillingError::Notification("mail relay unreachable".into()))
    }
}

// ============================================================================
// Promo validators
// ============================================================================

/// Never answers within any reasonable deadline.
#[derive(Debug, Default)]
pub struct SlowPromoValidator;

impl PromoValidator for SlowPromoValidator {
    async fn validate<'a>(&'a self, _code: &'a PromoCode) -> Result<PromoValidation> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(PromoValidation::valid(6))
    }

    async fn increment_usage<'a>(&'a self, _code: &'a PromoCode) -> Result<()> {
        Ok(())
    }
}

/// Validates like the wrapped validator but cannot record usage.
#[derive(Debug)]
pub struct UsageFailingValidator {
    pub inner: StaticPromoValidator,
}

impl PromoValidator for UsageFailingValidator {
    async fn validate<'a>(&'a self, code: &'a PromoCode) -> Result<PromoValidation> {
        self.inner.validate(code).await
    }

    async fn increment_usage<'a>(&'a self, _code: &'a PromoCode) -> Result<()> {
        Err(BillingError::PromoValidator("usage counter is read-only".into()))
    }
}

// ============================================================================
// Stores
// ============================================================================

/// Accepts subscription writes but refuses history entries.
#[derive(Debug, Default)]
pub struct HistoryFailingStore {
    pub inner: MemoryStore,
}

impl SubscriptionStore for HistoryFailingStore {
    async fn get_subscription<'a>(&'a self, owner: &'a OwnerId) -> Result<Option<Subscription>> {
        self.inner.get_subscription(owner).await
    }

    async fn put_subscription<'a>(
        &'a self,
        record: &'a Subscription,
        expected: Option<u64>,
    ) -> Result<u64> {
        self.inner.put_subscription(record, expected).await
    }

    async fn append_history(&self, _entry: HistoryEntry) -> Result<()> {
        Err(BillingError::Storage("history table is read-only".into()))
    }

    async fn count_children<'a>(&'a self, owner: &'a OwnerId) -> Result<u32> {
        self.inner.count_children(owner).await
    }
}

/// Lets a concurrent writer bump the record right before each of the next
/// `interference` conditional writes, so those writes lose the race.
#[derive(Debug, Default)]
pub struct ContendedStore {
    pub inner: MemoryStore,
    interference: AtomicU32,
    pub conflicts: AtomicU32,
}

impl ContendedStore {
    pub fn with_interference(times: u32) -> Self {
        Self { interference: AtomicU32::new(times), ..Self::default() }
    }

    async fn interfere(&self, owner: &OwnerId) -> Result<()> {
        let remaining = self.interference.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(());
        }
        self.interference.store(remaining - 1, Ordering::SeqCst);
        if let Some(current) = self.inner.get_subscription(owner).await? {
            self.inner.put_subscription(&current, Some(current.version)).await?;
        }
        Ok(())
    }
}

impl SubscriptionStore for ContendedStore {
    async fn get_subscription<'a>(&'a self, owner: &'a OwnerId) -> Result<Option<Subscription>> {
        self.inner.get_subscription(owner).await
    }

    async fn put_subscription<'a>(
        &'a self,
        record: &'a Subscription,
        expected: Option<u64>,
    ) -> Result<u64> {
        if expected.is_some() {
            self.interfere(&record.owner_id).await?;
        }
        let result = self.inner.put_subscription(record, expected).await;
        if matches!(result, Err(BillingError::VersionConflict { .. })) {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    async fn append_history(&self, entry: HistoryEntry) -> Result<()> {
        self.inner.append_history(entry).await
    }

    async fn count_children<'a>(&'a self, owner: &'a OwnerId) -> Result<u32> {
        self.inner.count_children(owner).await
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub const BASE_TRIAL_DAYS: u32 = 30;

pub fn owner(id: &str) -> OwnerId {
    OwnerId::new(id).unwrap()
}

pub fn code(value: &str) -> PromoCode {
    PromoCode::new(value).unwrap()
}

/// Validator knowing `SAVE2` (2 months), `EXPIRED` (inactive) and `ONCE` (1 use left).
pub fn promo_catalog() -> StaticPromoValidator {
    StaticPromoValidator::new()
        .with_code(code("SAVE2"), PromoDefinition::new(2))
        .with_code(code("EXPIRED"), PromoDefinition::new(3).inactive())
        .with_code(code("ONCE"), PromoDefinition::new(1).with_max_uses(1))
}

pub fn config() -> LifecycleConfig {
    LifecycleConfig::new(TrialPolicy::new(BASE_TRIAL_DAYS))
}

pub fn lifecycle_with<S, N>(store: S, notifier: N) -> SubscriptionLifecycle<S, StaticPromoValidator, N>
where
    S: SubscriptionStore,
    N: Notifier,
{
    SubscriptionLifecycle::new(store, promo_catalog(), notifier, config())
}

pub type TestLifecycle = SubscriptionLifecycle<MemoryStore, StaticPromoValidator, RecordingNotifier>;

pub fn lifecycle() -> TestLifecycle {
    lifecycle_with(MemoryStore::new(), RecordingNotifier::default())
}

/// Overwrites the stored record with `sub`, keeping the stored version.
///
/// Used to move dates into the past without going through the lifecycle.
pub async fn rewrite(store: &MemoryStore, sub: &Subscription) {
    let mut row = SubscriptionRow::from(sub);
    if let Some(stored) = store.row(&sub.owner_id).await {
        row.version = stored.version;
    }
    store.insert_row(row).await;
}
