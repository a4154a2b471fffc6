//! spi-arbiter - Shared SPI bus arbitration
//!
//! Command line front end for `spi-arbiter-core`. It can inspect SPI mode
//! timing, check claims against an access policy file, and run transfers and
//! transactions against a simulated bus to try out word sizes, modes and
//! transaction scripts.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let policy = cli.policy.as_deref();
    let result = match cli.command {
        Commands::Modes => {
            commands::print_modes();
            Ok(())
        }
        Commands::Check { bus, cs, peripheral } => {
            commands::run_check(policy, &bus, cs.as_deref(), peripheral)
        }
        Commands::Transfer { wire, data } => commands::run_transfer(policy, &wire, &data),
        Commands::Transaction { wire, ops } => commands::run_transaction(policy, &wire, &ops),
    };

    result.map_err(Into::into)
}
