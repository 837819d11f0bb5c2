//! Billing engine configuration.
//!
//! Loaded from TOML. The trial base length has no default and must be named explicitly;
//! every other setting falls back to a sensible value.
//!
//! # Example
//!
//! ```toml
//! [trial]
//! base_days = 30
//!
//! [collaborators]
//! promo_timeout_ms = 3000
//! notify_timeout_ms = 3000
//!
//! [concurrency]
//! max_conflict_retries = 5
//!
//! [circuit_breaker]
//! failure_threshold = 5
//! reset_timeout_secs = 60
//! ```

use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::{
    error::{BillingError, Result},
    lifecycle::LifecycleConfig,
    reliability::{CircuitBreakerConfig, RetryPolicy},
    trial::TrialPolicy,
};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BillingConfig {
    /// Trial settings.
    pub trial: TrialConfig,

    /// Collaborator deadlines.
    #[serde(default)]
    pub collaborators: CollaboratorConfig,

    /// Conditional write retries.
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    /// Notification dispatcher circuit breaker.
    #[serde(default)]
    pub circuit_breaker: BreakerConfig,
}

/// `[trial]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrialConfig {
    /// Trial days before any promo extension. Required.
    pub base_days: u32,
}

/// `[collaborators]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollaboratorConfig {
    /// Promo validator deadline in milliseconds.
    pub promo_timeout_ms: u64,
    /// Notification dispatcher deadline in milliseconds.
    pub notify_timeout_ms: u64,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self { promo_timeout_ms: 3000, notify_timeout_ms: 3000 }
    }
}

/// `[concurrency]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConcurrencyConfig {
    /// Re-reads allowed after a version conflict.
    pub max_conflict_retries: u32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { max_conflict_retries: 5 }
    }
}

/// `[circuit_breaker]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerConfig {
    /// Consecutive notification failures before the breaker opens.
    pub failure_threshold: u64,
    /// Seconds the breaker stays open before probing.
    pub reset_timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout_secs: 60 }
    }
}

impl BillingConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::Config`] if the document is malformed, `[trial] base_days`
    /// is missing, or a value is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use piopi_billing::config::BillingConfig;
    ///
    /// let config = BillingConfig::from_toml("[trial]\nbase_days = 7\n").unwrap();
    /// assert_eq!(config.trial.base_days, 7);
    /// assert_eq!(config.collaborators.promo_timeout_ms, 3000);
    ///
    /// assert!(BillingConfig::from_toml("[collaborators]\npromo_timeout_ms = 100\n").is_err());
    /// ```
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| BillingError::Config(e.message().to_owned()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::Config`] if the file cannot be read or fails
    /// [`from_toml`](Self::from_toml).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| BillingError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&source)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        check_range("trial.base_days", u64::from(self.trial.base_days), 1, 365)?;
        check_range("collaborators.promo_timeout_ms", self.collaborators.promo_timeout_ms, 1, 10_000)?;
        check_range(
            "collaborators.notify_timeout_ms",
            self.collaborators.notify_timeout_ms,
            1,
            10_000,
        )?;
        check_range(
            "concurrency.max_conflict_retries",
            u64::from(self.concurrency.max_conflict_retries),
            1,
            20,
        )?;
        check_range("circuit_breaker.failure_threshold", self.circuit_breaker.failure_threshold, 1, 1000)?;
        check_range(
            "circuit_breaker.reset_timeout_secs",
            self.circuit_breaker.reset_timeout_secs,
            1,
            86_400,
        )?;
        Ok(())
    }

    /// Resolved trial policy.
    #[must_use]
    pub const fn trial_policy(&self) -> TrialPolicy {
        TrialPolicy::new(self.trial.base_days)
    }

    /// Builds the lifecycle settings.
    #[must_use]
    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            trial: self.trial_policy(),
            promo_timeout: Duration::from_millis(self.collaborators.promo_timeout_ms),
            notify_timeout: Duration::from_millis(self.collaborators.notify_timeout_ms),
            conflict_retry: RetryPolicy::with_retries(self.concurrency.max_conflict_retries),
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: self.circuit_breaker.failure_threshold,
                reset_timeout: Duration::from_secs(self.circuit_breaker.reset_timeout_secs),
                ..CircuitBreakerConfig::default()
            },
        }
    }
}

fn check_range(key: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(BillingError::Config(format!("{key} must be between {min} and {max}, got {value}")))
    }
}
