//! CLI command implementations
//!
//! Data commands run against a [`SimBus`] attached under the requested label,
//! so they exercise the real claim, chip select and transaction paths without
//! hardware. The simulated bus echoes written words on transfers and reads
//! back all-ones words.

use std::path::Path;
use std::sync::Arc;

use spi_arbiter_core::{
    AllowAll, Bus, ClaimKey, ClaimMode, Controller, Mode, Operation, PolicyError, PolicyTable,
    Registry, SpiConfig, SpiError, TransactionResults,
};
use spi_arbiter_sim::SimBus;
use thiserror::Error;

use crate::cli::{parse_hex_bytes, WireArgs};

/// Errors reported by the CLI commands
#[derive(Debug, Error)]
pub enum CommandError {
    /// Bus operation failed
    #[error("{0}")]
    Spi(#[from] SpiError),

    /// Policy file could not be loaded
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Bad command line input
    #[error("{0}")]
    Usage(String),

    /// A transaction finished with failed steps
    #[error("transaction failed ({failed} of {total} steps)")]
    Transaction {
        /// Failed steps, counting a chip select release failure as one
        failed: usize,
        /// Steps requested
        total: usize,
    },
}

/// Registry with one simulated bus attached
fn open_registry(policy: Option<&Path>, bus: &str) -> Result<Arc<Registry>, CommandError> {
    let registry = match policy {
        Some(path) => {
            let table = PolicyTable::from_file(path)?;
            log::info!("Loaded policy from {}", path.display());
            Registry::new(table)
        }
        None => Registry::new(AllowAll),
    };
    registry.attach_bus(bus, SimBus::new_default())?;
    Ok(registry)
}

fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn mode_row(mode: Mode) -> String {
    let timing = mode.timing();
    format!(
        "{:<6} {:<8} {:<8} {} cycle(s)",
        mode.to_string(),
        timing.sample_edge.to_string(),
        timing.drive_edge.to_string(),
        timing.cs_to_first_bit
    )
}

/// Print the clock timing table
pub fn print_modes() {
    println!("{:<6} {:<8} {:<8} {}", "Mode", "Sample", "Drive", "CS to first bit");
    for mode in Mode::ALL {
        println!("{}", mode_row(mode));
    }
}

/// Try to claim `bus` (and `cs`) under the configured policy
pub fn run_check(
    policy: Option<&Path>,
    bus: &str,
    cs: Option<&str>,
    peripheral: bool,
) -> Result<(), CommandError> {
    let registry = open_registry(policy, bus)?;
    let (key, mode) = match cs {
        Some(cs) => (ClaimKey::chip_select(bus, cs), ClaimMode::ExclusiveCs),
        None if peripheral => (ClaimKey::bus(bus), ClaimMode::Peripheral),
        None => (ClaimKey::bus(bus), ClaimMode::ExclusiveBus),
    };

    match registry.claim(key.clone(), mode) {
        Ok(token) => {
            println!("{} ({:?}): allowed", key, mode);
            registry.release(token)?;
            Ok(())
        }
        Err(SpiError::NotAllowed) => {
            println!("{} ({:?}): denied", key, mode);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Full-duplex transfer of `data`, printing what came back
pub fn run_transfer(policy: Option<&Path>, wire: &WireArgs, data: &str) -> Result<(), CommandError> {
    let data = parse_hex_bytes(data).map_err(CommandError::Usage)?;
    let config = wire.to_config();
    let registry = open_registry(policy, &config.bus)?;

    let read = if config.cs_pin.is_some() {
        let mut ctrl = Controller::get(&registry, config)?;
        let read = ctrl.transfer_n_words(&data)?;
        ctrl.release()?;
        read
    } else {
        let mut bus = Bus::get(&registry, config)?;
        let read = bus.transfer_n_words(&data)?;
        bus.release()?;
        read
    };
    println!("{}", format_hex(&read));
    Ok(())
}

/// Run `ops` as one transaction and print each step's outcome
pub fn run_transaction(
    policy: Option<&Path>,
    wire: &WireArgs,
    ops: &[Operation],
) -> Result<(), CommandError> {
    let config: SpiConfig = wire.to_config();
    let registry = open_registry(policy, &config.bus)?;

    let results = if config.cs_pin.is_some() {
        let mut ctrl = Controller::get(&registry, config)?;
        let results = ctrl.transaction(ops);
        ctrl.release()?;
        results
    } else {
        let mut bus = Bus::get(&registry, config)?;
        let results = bus.transaction(ops);
        bus.release()?;
        results
    };

    print_results(ops, &results);
    if results.is_ok() {
        Ok(())
    } else {
        let failed = results.iter().filter(|r| r.is_err()).count()
            + usize::from(results.deselect_fault().is_some());
        Err(CommandError::Transaction {
            failed,
            total: ops.len(),
        })
    }
}

fn print_results(ops: &[Operation], results: &TransactionResults) {
    for (i, (op, result)) in ops.iter().zip(results.iter()).enumerate() {
        match result {
            Ok(Some(bytes)) => println!("{:>3} {:<8} {}", i, op.name(), format_hex(bytes)),
            Ok(None) => println!("{:>3} {:<8} ok", i, op.name()),
            Err(e) => println!("{:>3} {:<8} error: {}", i, op.name(), e),
        }
    }
    if let Some(e) = results.deselect_fault() {
        println!("chip select release failed: {}", e);
    }
}
