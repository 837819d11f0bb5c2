//! Plan catalog.
//!
//! Static table of the five PioPi plan tiers. Each tier fixes how many children are
//! included, the monthly base price and what happens when the household outgrows it.

use std::{fmt, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};

/// Identifier of a plan tier.
///
/// Tiers are ordered by size, so `PlanTierId::Basic < PlanTierId::Liberte`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTierId {
    /// One child.
    Basic,
    /// Two children.
    Duo,
    /// Three children.
    Family,
    /// Four children.
    Premium,
    /// Five children included, each extra child billed on top.
    Liberte,
}

impl PlanTierId {
    /// All tiers in catalog order.
    pub const ALL: [Self; 5] = [Self::Basic, Self::Duo, Self::Family, Self::Premium, Self::Liberte];

    /// Returns the wire identifier of the tier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Duo => "duo",
            Self::Family => "family",
            Self::Premium => "premium",
            Self::Liberte => "liberte",
        }
    }
}

impl fmt::Display for PlanTierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTierId {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str() == s)
            .ok_or_else(|| BillingError::UnknownTier(s.to_owned()))
    }
}

/// What happens when a household grows past a tier's included children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// The tier is capped: extra children require an explicit tier change.
    Block,
    /// The tier is uncapped: billed count and price follow the household.
    Autobill,
}

/// A plan tier entry in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanTier {
    /// Tier identifier.
    pub id: PlanTierId,
    /// Children covered by the base price.
    pub included_children: u32,
    /// Monthly price in euros.
    pub base_price: Decimal,
    /// Monthly price per child beyond `included_children` (uncapped tier only).
    pub extra_child_price: Decimal,
    /// Overflow behavior.
    pub on_overflow: OverflowPolicy,
}

impl PlanTier {
    /// Returns `true` when the billed count is pinned to the included children.
    #[must_use]
    pub fn is_capped(&self) -> bool {
        self.on_overflow == OverflowPolicy::Block
    }
}

static CATALOG: [PlanTier; 5] = [
    PlanTier {
        id: PlanTierId::Basic,
        included_children: 1,
        base_price: Decimal::from_parts(300, 0, 0, false, 2),
        extra_child_price: Decimal::ZERO,
        on_overflow: OverflowPolicy::Block,
    },
    PlanTier {
        id: PlanTierId::Duo,
        included_children: 2,
        base_price: Decimal::from_parts(400, 0, 0, false, 2),
        extra_child_price: Decimal::ZERO,
        on_overflow: OverflowPolicy::Block,
    },
    PlanTier {
        id: PlanTierId::Family,
        included_children: 3,
        base_price: Decimal::from_parts(500, 0, 0, false, 2),
        extra_child_price: Decimal::ZERO,
        on_overflow: OverflowPolicy::Block,
    },
    PlanTier {
        id: PlanTierId::Premium,
        included_children: 4,
        base_price: Decimal::from_parts(600, 0, 0, false, 2),
        extra_child_price: Decimal::ZERO,
        on_overflow: OverflowPolicy::Block,
    },
    PlanTier {
        id: PlanTierId::Liberte,
        included_children: 5,
        base_price: Decimal::from_parts(600, 0, 0, false, 2),
        extra_child_price: Decimal::from_parts(200, 0, 0, false, 2),
        on_overflow: OverflowPolicy::Autobill,
    },
];

/// Returns the catalog entry for a tier.
#[must_use]
pub fn plan(tier: PlanTierId) -> &'static PlanTier {
    // CATALOG is declared in PlanTierId::ALL order
    &CATALOG[tier as usize]
}

/// Looks up a tier by its wire identifier.
///
/// # Errors
///
/// Returns [`BillingError::UnknownTier`] if `tier_id` is not one of the five tiers.
///
/// # Examples
///
/// ```
/// use piopi_billing::catalog::get_plan;
/// use rust_decimal::Decimal;
///
/// let premium = get_plan("premium").unwrap();
/// assert_eq!(premium.included_children, 4);
/// assert_eq!(premium.base_price, Decimal::new(600, 2));
/// assert!(get_plan("gold").is_err());
/// ```
pub fn get_plan(tier_id: &str) -> Result<&'static PlanTier> {
    tier_id.parse().map(plan)
}

/// Returns every tier in catalog order.
#[must_use]
pub fn all() -> &'static [PlanTier] {
    &CATALOG
}

/// Returns the smallest tier that covers `children` without an overflow wall.
///
/// Capped tiers are tried in order; households larger than every cap land on the
/// uncapped tier.
#[must_use]
pub fn smallest_tier_for(children: u32) -> PlanTierId {
    CATALOG
        .iter()
        .find(|tier| !tier.is_capped() || tier.included_children >= children)
        .map_or(PlanTierId::Liberte, |tier| tier.id)
}
