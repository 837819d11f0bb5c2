//! Storage collaborator.
//!
//! Subscriptions are keyed by owner: each parent holds at most one record. Writes are
//! conditional on the record's `version` so concurrent read-modify-write cycles never lose
//! an update; the lifecycle re-reads and recomputes on [`BillingError::VersionConflict`].
//!
//! [`BillingError::VersionConflict`]: crate::error::BillingError::VersionConflict

#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;

use crate::{
    error::Result,
    subscription::{HistoryEntry, OwnerId, Subscription},
};

mod memory;

pub use memory::MemoryStore;

/// Persistence for subscriptions, their history and household sizes.
pub trait SubscriptionStore: Send + Sync {
    /// Loads the subscription owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`CorruptRecord`](crate::error::BillingError::CorruptRecord) if the stored
    /// row fails validation, or a storage error if the backend is unavailable.
    fn get_subscription<'a>(
        &'a self,
        owner: &'a OwnerId,
    ) -> impl Future<Output = Result<Option<Subscription>>> + Send + 'a;

    /// Upserts `record` keyed by its owner, conditional on `expected`.
    ///
    /// With `expected = None` the write only succeeds if no record exists. With
    /// `expected = Some(v)` it only succeeds if the stored version is `v`. Returns the new
    /// version, which the caller copies into its record.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateSubscription`](crate::error::BillingError::DuplicateSubscription)
    /// when inserting over an existing record and
    /// [`VersionConflict`](crate::error::BillingError::VersionConflict) when the stored
    /// version moved.
    fn put_subscription<'a>(
        &'a self,
        record: &'a Subscription,
        expected: Option<u64>,
    ) -> impl Future<Output = Result<u64>> + Send + 'a;

    /// Appends an immutable history entry.
    ///
    /// # Errors
    ///
    /// Returns error if the backend rejects the write.
    fn append_history(&self, entry: HistoryEntry) -> impl Future<Output = Result<()>> + Send + '_;

    /// Number of children currently registered for `owner`.
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unavailable.
    fn count_children<'a>(
        &'a self,
        owner: &'a OwnerId,
    ) -> impl Future<Output = Result<u32>> + Send + 'a;
}
