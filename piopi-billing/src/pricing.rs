//! Pricing engine.
//!
//! Pure functions mapping a tier and a billed child count to a monthly price.
//! Capped tiers are flat-rate; the uncapped tier charges per extra child.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    catalog::{self, PlanTierId},
    error::{BillingError, Result},
    subscription::BillingPeriod,
};

/// Computes the monthly price for `billed_child_count` children on `tier`.
///
/// # Errors
///
/// Returns [`BillingError::InvalidChildCount`] when the count breaks the tier's billing rule:
/// capped tiers accept exactly their included children, the uncapped tier accepts at least
/// its included children.
///
/// # Examples
///
/// ```
/// use piopi_billing::{catalog::PlanTierId, pricing::compute_price};
/// use rust_decimal::Decimal;
///
/// # fn example() -> piopi_billing::Result<()> {
/// assert_eq!(compute_price(PlanTierId::Premium, 4)?, Decimal::new(600, 2));
/// assert_eq!(compute_price(PlanTierId::Liberte, 7)?, Decimal::new(1000, 2));
/// # Ok(())
/// # }
/// ```
pub fn compute_price(tier: PlanTierId, billed_child_count: u32) -> Result<Decimal> {
    let plan = catalog::plan(tier);

    if plan.is_capped() {
        if billed_child_count != plan.included_children {
            return Err(BillingError::InvalidChildCount {
                tier,
                count: billed_child_count,
                expected: format!("exactly {}", plan.included_children),
            });
        }
        return Ok(plan.base_price);
    }

    if billed_child_count < plan.included_children {
        return Err(BillingError::InvalidChildCount {
            tier,
            count: billed_child_count,
            expected: format!("at least {}", plan.included_children),
        });
    }

    let extra = billed_child_count - plan.included_children;
    Ok(plan.base_price + plan.extra_child_price * Decimal::from(extra))
}

/// Same as [`compute_price`] for a tier given by its wire identifier.
///
/// # Errors
///
/// Returns [`BillingError::UnknownTier`] for an unknown id, otherwise as [`compute_price`].
pub fn compute_price_by_id(tier_id: &str, billed_child_count: u32) -> Result<Decimal> {
    compute_price(tier_id.parse()?, billed_child_count)
}

/// Returns the child count a subscription on `tier` is billed for.
///
/// Capped tiers always bill their included children, whatever the household size.
/// The uncapped tier bills `max(actual_children, included_children)`.
#[must_use]
pub fn billed_child_count(tier: PlanTierId, actual_children: u32) -> u32 {
    let plan = catalog::plan(tier);
    if plan.is_capped() {
        plan.included_children
    } else {
        actual_children.max(plan.included_children)
    }
}

/// Price quote for a household on a tier and billing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    /// Quoted tier.
    pub tier: PlanTierId,
    /// Billing period.
    pub billing_period: BillingPeriod,
    /// Child count the price is computed against.
    pub billed_child_count: u32,
    /// Monthly price.
    pub monthly_price: Decimal,
    /// Amount charged per billing period.
    pub period_total: Decimal,
}

/// Builds a quote for `actual_children` on `tier`.
///
/// # Errors
///
/// Propagates [`compute_price`] errors; none occur for counts produced by
/// [`billed_child_count`].
pub fn quote(tier: PlanTierId, actual_children: u32, billing_period: BillingPeriod) -> Result<Quote> {
    let billed = billed_child_count(tier, actual_children);
    let monthly_price = compute_price(tier, billed)?;
    Ok(Quote {
        tier,
        billing_period,
        billed_child_count: billed,
        monthly_price,
        period_total: monthly_price * Decimal::from(billing_period.months()),
    })
}
