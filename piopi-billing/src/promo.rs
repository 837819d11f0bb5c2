//! Promo code validation.
//!
//! A promo code grants free months that extend a new trial. Validation is delegated to a
//! [`PromoValidator`]; the lifecycle reports what happened to the code through
//! [`PromoOutcome`] so an invalid code is never silently dropped.

#[allow(
    redundant_imports,
    reason = "Future needed for RPITIT despite being in Edition 2024 prelude"
)]
use std::future::Future;
use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{BillingError, Result};

/// Normalized promo code.
///
/// Codes are trimmed and upper-cased, 1 to 32 characters of `[A-Z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PromoCode(String);

impl PromoCode {
    /// Normalizes and validates a code.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::InvalidPromoCode`] if the code is empty, longer than 32
    /// characters, or contains characters outside `[A-Z0-9_-]`.
    ///
    /// # Examples
    ///
    /// ```
    /// use piopi_billing::promo::PromoCode;
    ///
    /// let code = PromoCode::new("  save2 ").unwrap();
    /// assert_eq!(code.as_str(), "SAVE2");
    /// assert!(PromoCode::new("save 2").is_err());
    /// ```
    pub fn new<S: AsRef<str>>(code: S) -> Result<Self> {
        let code = code.as_ref().trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(BillingError::InvalidPromoCode("promo code cannot be empty".into()));
        }
        if code.len() > 32 {
            return Err(BillingError::InvalidPromoCode(
                "promo code must be 32 characters or less".into(),
            ));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(BillingError::InvalidPromoCode(format!(
                "{code} contains characters other than letters, digits, hyphens and underscores"
            )));
        }
        Ok(Self(code))
    }

    /// Returns the normalized code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PromoCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PromoCode {
    type Error = BillingError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PromoCode> for String {
    fn from(code: PromoCode) -> Self {
        code.0
    }
}

/// Answer of the promo validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoValidation {
    /// Whether the code can be redeemed.
    pub valid: bool,
    /// Free months granted when valid.
    pub free_months: Option<u32>,
    /// Reason given by the validator, if any.
    pub message: Option<String>,
}

impl PromoValidation {
    /// A redeemable code granting `free_months`.
    #[must_use]
    pub const fn valid(free_months: u32) -> Self {
        Self { valid: true, free_months: Some(free_months), message: None }
    }

    /// A rejected code.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self { valid: false, free_months: None, message: Some(message.into()) }
    }
}

/// What happened to the promo code passed at trial creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PromoOutcome {
    /// The bonus was applied to the trial.
    Applied {
        /// Redeemed code.
        code: PromoCode,
        /// Free months added to the trial.
        free_months: u32,
    },
    /// The validator rejected the code; the trial runs without bonus.
    Rejected {
        /// Rejected code.
        code: PromoCode,
        /// Validator message.
        message: Option<String>,
    },
    /// The validator could not be reached; the trial runs without bonus.
    Unavailable {
        /// Code that could not be checked.
        code: PromoCode,
        /// Failure description.
        reason: String,
    },
}

impl PromoOutcome {
    /// Free months actually granted.
    #[must_use]
    pub const fn free_months(&self) -> u32 {
        match self {
            Self::Applied { free_months, .. } => *free_months,
            Self::Rejected { .. } | Self::Unavailable { .. } => 0,
        }
    }

    /// Returns `true` if the bonus was applied.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Promo code validator collaborator.
pub trait PromoValidator: Send + Sync {
    /// Checks whether `code` can be redeemed.
    ///
    /// # Errors
    ///
    /// Returns error if the validator cannot be reached.
    fn validate<'a>(
        &'a self,
        code: &'a PromoCode,
    ) -> impl Future<Output = Result<PromoValidation>> + Send + 'a;

    /// Records one redemption of `code`.
    ///
    /// # Errors
    ///
    /// Returns error if the usage counter cannot be updated.
    fn increment_usage<'a>(&'a self, code: &'a PromoCode)
    -> impl Future<Output = Result<()>> + Send + 'a;
}

/// A promo code definition held by [`StaticPromoValidator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoDefinition {
    /// Free months granted.
    pub free_months: u32,
    /// Inactive codes are rejected.
    pub active: bool,
    /// Redemption cap, unlimited when `None`.
    pub max_uses: Option<u32>,
    /// Redemptions so far.
    pub current_uses: u32,
}

impl PromoDefinition {
    /// An active, uncapped code.
    #[must_use]
    pub const fn new(free_months: u32) -> Self {
        Self { free_months, active: true, max_uses: None, current_uses: 0 }
    }

    /// Caps the number of redemptions.
    #[must_use]
    pub const fn with_max_uses(mut self, max_uses: u32) -> Self {
        self.max_uses = Some(max_uses);
        self
    }

    /// Marks the code inactive.
    #[must_use]
    pub const fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// In-memory promo validator for development and tests.
#[derive(Debug, Default)]
pub struct StaticPromoValidator {
    codes: RwLock<HashMap<PromoCode, PromoDefinition>>,
}

impl StaticPromoValidator {
    /// Creates an empty validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a code definition.
    #[must_use]
    pub fn with_code(mut self, code: PromoCode, definition: PromoDefinition) -> Self {
        self.codes.get_mut().insert(code, definition);
        self
    }

    /// Redemptions recorded for `code`.
    pub async fn usage(&self, code: &PromoCode) -> Option<u32> {
        self.codes.read().await.get(code).map(|def| def.current_uses)
    }
}

impl PromoValidator for StaticPromoValidator {
    async fn validate<'a>(&'a self, code: &'a PromoCode) -> Result<PromoValidation> {
        let codes = self.codes.read().await;
        let Some(def) = codes.get(code) else {
            return Ok(PromoValidation::invalid(format!("promo code {code} does not exist")));
        };
        if !def.active {
            return Ok(PromoValidation::invalid(format!("promo code {code} is no longer active")));
        }
        if let Some(max) = def.max_uses
            && def.current_uses >= max
        {
            return Ok(PromoValidation::invalid(format!("promo code {code} has been fully used")));
        }
        debug!(code = %code, free_months = def.free_months, "promo code valid");
        Ok(PromoValidation::valid(def.free_months))
    }

    async fn increment_usage<'a>(&'a self, code: &'a PromoCode) -> Result<()> {
        let mut codes = self.codes.write().await;
        let def = codes
            .get_mut(code)
            .ok_or_else(|| BillingError::PromoValidator(format!("unknown promo code {code}")))?;
        def.current_uses += 1;
        Ok(())
    }
}
