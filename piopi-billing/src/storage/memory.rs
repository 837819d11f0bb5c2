//! In-memory reference store.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use super::SubscriptionStore;
use crate::{
    error::{BillingError, Result},
    subscription::{HistoryEntry, OwnerId, Subscription, SubscriptionRow},
};

/// Store backed by in-process maps.
///
/// Records are kept as [`SubscriptionRow`]s, the same loose shape the hosted store returns,
/// so every read goes through row validation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<String, SubscriptionRow>>,
    history: RwLock<Vec<HistoryEntry>>,
    children: RwLock<HashMap<String, u32>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of children registered for `owner`.
    pub async fn set_child_count(&self, owner: &OwnerId, count: u32) {
        self.children.write().await.insert(owner.to_string(), count);
    }

    /// Writes a raw row, bypassing version checks.
    ///
    /// Used to seed records with past dates or malformed fields.
    pub async fn insert_row(&self, row: SubscriptionRow) {
        self.rows.write().await.insert(row.owner_id.clone(), row);
    }

    /// Returns the raw row stored for `owner`.
    pub async fn row(&self, owner: &OwnerId) -> Option<SubscriptionRow> {
        self.rows.read().await.get(owner.as_str()).cloned()
    }

    /// History entries for `owner`, oldest first.
    pub async fn history_for(&self, owner: &OwnerId) -> Vec<HistoryEntry> {
        self.history
            .read()
            .await
            .iter()
            .filter(|entry| &entry.subscription_owner_id == owner)
            .cloned()
            .collect()
    }
}

impl SubscriptionStore for MemoryStore {
    async fn get_subscription<'a>(&'a self, owner: &'a OwnerId) -> Result<Option<Subscription>> {
        let row = self.rows.read().await.get(owner.as_str()).cloned();
        row.map(Subscription::try_from).transpose()
    }

    async fn put_subscription<'a>(
        &'a self,
        record: &'a Subscription,
        expected: Option<u64>,
    ) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let key = record.owner_id.as_str();

        let stored = rows.get(key).map(|row| row.version);
        let next = match (stored, expected) {
            (None, None) => 1,
            (Some(_), None) => {
                return Err(BillingError::DuplicateSubscription(key.to_owned()));
            }
            (Some(current), Some(version)) if u64::try_from(current).ok() == Some(version) => {
                version + 1
            }
            _ => {
                return Err(BillingError::VersionConflict { owner_id: key.to_owned(), expected });
            }
        };

        let mut row = SubscriptionRow::from(record);
        row.version = i64::try_from(next).map_err(|e| BillingError::Storage(e.to_string()))?;
        rows.insert(key.to_owned(), row);
        debug!(owner_id = key, version = next, "subscription row written");
        Ok(next)
    }

    async fn append_history(&self, entry: HistoryEntry) -> Result<()> {
        self.history.write().await.push(entry);
        Ok(())
    }

    async fn count_children<'a>(&'a self, owner: &'a OwnerId) -> Result<u32> {
        Ok(self.children.read().await.get(owner.as_str()).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use super::*;
    use crate::{
        catalog::PlanTierId,
        subscription::{BillingPeriod, HistoryAction, SubscriptionId, SubscriptionStatus},
    };

    fn create_test_subscription(owner: &str) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: SubscriptionId::generate(),
            owner_id: OwnerId::new(owner).unwrap(),
            plan_tier: PlanTierId::Duo,
            billing_period: BillingPeriod::Monthly,
            billed_child_count: 2,
            price: Decimal::new(400, 2),
            status: SubscriptionStatus::Trial,
            trial_start: now,
            trial_end: now + Duration::days(30),
            subscription_start: None,
            subscription_end: None,
            promo_code: None,
            promo_months_remaining: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    // ========================================================================
    // Compare-and-swap Tests
    // ========================================================================

    #[tokio::test]
    async fn test_insert_then_read() {
        let store = MemoryStore::new();
        let sub = create_test_subscription("p-1");

        let version = store.put_subscription(&sub, None).await.unwrap();
        assert_eq!(version, 1);

        let loaded = store.get_subscription(&sub.owner_id).await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.plan_tier, PlanTierId::Duo);
    }

    #[tokio::test]
    async fn test_insert_over_existing_is_duplicate() {
        let store = MemoryStore::new();
        let sub = create_test_subscription("p-1");
        store.put_subscription(&sub, None).await.unwrap();

        let err = store.put_subscription(&sub, None).await.unwrap_err();
        assert!(matches!(err, BillingError::DuplicateSubscription(_)));
    }

    #[tokio::test]
    async fn test_update_with_matching_version() {
        let store = MemoryStore::new();
        let sub = create_test_subscription("p-1");
        store.put_subscription(&sub, None).await.unwrap();

        let version = store.put_subscription(&sub, Some(1)).await.unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let store = MemoryStore::new();
        let sub = create_test_subscription("p-1");
        store.put_subscription(&sub, None).await.unwrap();
        store.put_subscription(&sub, Some(1)).await.unwrap();

        let err = store.put_subscription(&sub, Some(1)).await.unwrap_err();
        assert!(matches!(err, BillingError::VersionConflict { expected: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_update_missing_record_conflicts() {
        let store = MemoryStore::new();
        let sub = create_test_subscription("p-1");
        let err = store.put_subscription(&sub, Some(3)).await.unwrap_err();
        assert!(matches!(err, BillingError::VersionConflict { .. }));
    }

    // ========================================================================
    // Row Validation Tests
    // ========================================================================

    #[tokio::test]
    async fn test_corrupt_row_fails_fast() {
        let store = MemoryStore::new();
        let sub = create_test_subscription("p-1");
        let mut row = SubscriptionRow::from(&sub);
        row.plan_tier = "gold".into();
        store.insert_row(row).await;

        let err = store.get_subscription(&sub.owner_id).await.unwrap_err();
        assert!(matches!(err, BillingError::CorruptRecord(_)));
    }

    #[tokio::test]
    async fn test_missing_record_is_none() {
        let store = MemoryStore::new();
        let owner = OwnerId::new("nobody").unwrap();
        assert!(store.get_subscription(&owner).await.unwrap().is_none());
    }

    // ========================================================================
    // History and Children Tests
    // ========================================================================

    #[tokio::test]
    async fn test_history_is_filtered_by_owner() {
        let store = MemoryStore::new();
        let a = create_test_subscription("p-a");
        let b = create_test_subscription("p-b");

        store.append_history(HistoryEntry::capture(&a, HistoryAction::Created)).await.unwrap();
        store.append_history(HistoryEntry::capture(&b, HistoryAction::Created)).await.unwrap();
        store.append_history(HistoryEntry::capture(&a, HistoryAction::Cancelled)).await.unwrap();

        let history = store.history_for(&a.owner_id).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].action_type, HistoryAction::Cancelled);
    }

    #[tokio::test]
    async fn test_child_count_defaults_to_zero() {
        let store = MemoryStore::new();
        let owner = OwnerId::new("p-1").unwrap();
        assert_eq!(store.count_children(&owner).await.unwrap(), 0);

        store.set_child_count(&owner, 3).await;
        assert_eq!(store.count_children(&owner).await.unwrap(), 3);
    }
}
