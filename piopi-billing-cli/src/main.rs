//! PioPi billing operator tool.
//!
//! Usage:
//!   piopi-billing plans
//!   piopi-billing quote --tier liberte --children 7 --period yearly
//!   piopi-billing trial --config billing.toml --promo-months 2
//!   piopi-billing check-config --config billing.toml
//!
//! Reports are printed to stdout as JSON; logs go to stderr (`RUST_LOG`, `LOG_FORMAT`).

mod cli;
mod commands;
mod observability;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use observability::{LogFormat, init_observability};
use serde::Serialize;
use tracing::error;

fn main() -> ExitCode {
    init_observability(LogFormat::from_env());
    let cli = Cli::parse();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "command failed");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Plans => print_json(&commands::plans()),
        Commands::Quote(args) => print_json(&commands::quote(&args)?),
        Commands::Trial(args) => print_json(&commands::trial(&args)?),
        Commands::CheckConfig(args) => print_json(&commands::check_config(&args)?),
    }
}

fn print_json<T: Serialize>(report: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
