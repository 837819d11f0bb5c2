//! PioPi Billing: subscription pricing and lifecycle engine.
//!
//! Parents on the PioPi education platform hold a single subscription that prices their
//! household by plan tier and child count, starts with a free trial (optionally extended by
//! a promo code) and moves through `trial → active → cancelled/expired`. Every committed
//! transition leaves an audit history entry and emits a best-effort notification.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────────────────────┐
//!   caller ──────►│          SubscriptionLifecycle           │
//!                 │   catalog ─► pricing      trial policy   │
//!                 └─────┬──────────────┬──────────────┬──────┘
//!                       │ CAS writes   │ timeout      │ timeout + breaker
//!                       ▼              ▼              ▼
//!              SubscriptionStore  PromoValidator    Notifier
//! ```
//!
//! The catalog, pricing engine and trial policy are pure. The lifecycle reaches the
//! outside world only through the three collaborator traits; [`storage::MemoryStore`],
//! [`promo::StaticPromoValidator`] and [`notify::LogNotifier`] are in-process
//! implementations for development and tests.
//!
//! # Quick Start
//!
//! ```rust
//! use piopi_billing::{
//!     catalog::PlanTierId,
//!     lifecycle::{LifecycleConfig, SubscriptionLifecycle},
//!     notify::LogNotifier,
//!     promo::{PromoCode, PromoDefinition, StaticPromoValidator},
//!     storage::MemoryStore,
//!     subscription::{BillingPeriod, OwnerId, SubscriptionStatus},
//!     trial::TrialPolicy,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> piopi_billing::Result<()> {
//! let promo = StaticPromoValidator::new()
//!     .with_code(PromoCode::new("SAVE2")?, PromoDefinition::new(2));
//! let lifecycle = SubscriptionLifecycle::new(
//!     MemoryStore::new(),
//!     promo,
//!     LogNotifier,
//!     LifecycleConfig::new(TrialPolicy::new(30)),
//! );
//!
//! let owner = OwnerId::new("parent-42")?;
//! let outcome = lifecycle
//!     .create_trial_subscription(
//!         &owner,
//!         PlanTierId::Family,
//!         BillingPeriod::Monthly,
//!         Some(PromoCode::new("save2")?),
//!     )
//!     .await?;
//!
//! let trial = outcome.subscription.trial_window();
//! assert_eq!((trial.end - trial.start).num_days(), 90);
//! assert_eq!(outcome.subscription.status, SubscriptionStatus::Trial);
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! All operations return [`Result<T, BillingError>`](error::Result). Validation and state
//! errors are raised before anything is written. Collaborator failures after a committed
//! write come back as [`lifecycle::Warning`]s on a successful outcome instead.
//!
//! ```rust
//! use piopi_billing::{BillingError, catalog::smallest_tier_for};
//!
//! fn explain(error: &BillingError) -> String {
//!     match error {
//!         BillingError::UpgradeRequired { requested, .. } => {
//!             format!("switch to {}", smallest_tier_for(*requested))
//!         }
//!         other => other.to_string(),
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod admin;
pub mod catalog;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod pricing;
pub mod promo;
pub mod reliability;
pub mod storage;
pub mod subscription;
pub mod trial;

pub use error::{BillingError, Result};
pub use lifecycle::{LifecycleConfig, LifecycleOutcome, SubscriptionLifecycle, Warning};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = std::marker::PhantomData::<BillingError>;
        let _ = std::marker::PhantomData::<LifecycleOutcome>;
    }
}
