//! Subcommand implementations.
//!
//! Each command returns a serializable report; `main` prints it as JSON.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use piopi_billing::{
    catalog::{self, OverflowPolicy, PlanTierId},
    config::BillingConfig,
    pricing::{self, Quote},
};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::cli::{CheckConfigArgs, QuoteArgs, TrialArgs};

/// One catalog line.
#[derive(Debug, Serialize)]
pub struct PlanRow {
    pub tier: PlanTierId,
    pub included_children: u32,
    pub base_price: Decimal,
    pub extra_child_price: Decimal,
    pub on_overflow: OverflowPolicy,
}

#[derive(Debug, Serialize)]
pub struct TrialReport {
    pub base_days: u32,
    pub promo_months: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub length_days: i64,
}

#[derive(Debug, Serialize)]
pub struct ConfigReport {
    pub valid: bool,
    pub base_days: u32,
    pub promo_timeout_ms: u64,
    pub notify_timeout_ms: u64,
    pub max_conflict_retries: u32,
}

pub fn plans() -> Vec<PlanRow> {
    catalog::all()
        .iter()
        .map(|plan| PlanRow {
            tier: plan.id,
            included_children: plan.included_children,
            base_price: plan.base_price,
            extra_child_price: plan.extra_child_price,
            on_overflow: plan.on_overflow,
        })
        .collect()
}

pub fn quote(args: &QuoteArgs) -> Result<Quote> {
    let quote = pricing::quote(args.tier, args.children, args.period.into())
        .with_context(|| format!("cannot quote {} for {} children", args.tier, args.children))?;
    let plan = catalog::plan(args.tier);
    if plan.is_capped() && args.children > plan.included_children {
        info!(
            tier = %args.tier,
            children = args.children,
            suggested = %catalog::smallest_tier_for(args.children),
            "household exceeds the tier cap"
        );
    }
    Ok(quote)
}

pub fn trial(args: &TrialArgs) -> Result<TrialReport> {
    let config = load(&args.config)?;
    let start = args.start.unwrap_or_else(Utc::now);
    let window = config.trial_policy().window(start, args.promo_months);
    Ok(TrialReport {
        base_days: config.trial.base_days,
        promo_months: args.promo_months,
        start: window.start,
        end: window.end,
        length_days: (window.end - window.start).num_days(),
    })
}

pub fn check_config(args: &CheckConfigArgs) -> Result<ConfigReport> {
    let config = load(&args.config)?;
    Ok(ConfigReport {
        valid: true,
        base_days: config.trial.base_days,
        promo_timeout_ms: config.collaborators.promo_timeout_ms,
        notify_timeout_ms: config.collaborators.notify_timeout_ms,
        max_conflict_retries: config.concurrency.max_conflict_retries,
    })
}

fn load(path: &std::path::Path) -> Result<BillingConfig> {
    BillingConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}
