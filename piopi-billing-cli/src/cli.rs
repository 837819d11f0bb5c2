//! CLI argument definitions using clap.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use piopi_billing::{catalog::PlanTierId, subscription::BillingPeriod};

#[derive(Parser, Debug)]
#[command(name = "piopi-billing")]
#[command(version)]
#[command(about = "Inspect PioPi plans, price quotes and trial windows", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the plan catalog
    Plans,

    /// Quote the monthly and per-period price for a household
    Quote(QuoteArgs),

    /// Compute the trial window from a billing config file
    Trial(TrialArgs),

    /// Validate a billing config file
    CheckConfig(CheckConfigArgs),
}

#[derive(Parser, Debug)]
pub struct QuoteArgs {
    /// Plan tier (basic, duo, family, premium, liberte)
    #[arg(short, long)]
    pub tier: PlanTierId,

    /// Number of children in the household
    #[arg(short, long, default_value_t = 0)]
    pub children: u32,

    /// Billing period
    #[arg(short, long, value_enum, default_value = "monthly")]
    pub period: Period,
}

#[derive(Parser, Debug)]
pub struct TrialArgs {
    /// Billing config file (TOML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Trial start as RFC 3339 (defaults to now)
    #[arg(short, long)]
    pub start: Option<DateTime<Utc>>,

    /// Free months granted by a promo code
    #[arg(long, default_value_t = 0)]
    pub promo_months: u32,
}

#[derive(Parser, Debug)]
pub struct CheckConfigArgs {
    /// Billing config file (TOML)
    #[arg(short, long)]
    pub config: PathBuf,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Period {
    /// Charged every month
    Monthly,
    /// Charged once a year
    Yearly,
}

impl From<Period> for BillingPeriod {
    fn from(period: Period) -> Self {
        match period {
            Period::Monthly => Self::Monthly,
            Period::Yearly => Self::Yearly,
        }
    }
}
