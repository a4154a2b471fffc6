//! CLI argument parsing

use clap::{Parser, Subcommand};
use spi_arbiter_core::{Mode, Operation, SpiConfig};
use std::path::PathBuf;

/// Parse a hex byte string such as `9f`, `0x9f00` or `de:ad:be:ef`
pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, String> {
    let digits: String = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
        .chars()
        .filter(|c| *c != ':' && *c != '_')
        .collect();
    if !digits.is_ascii() {
        return Err(format!("Invalid hex value '{}'", s));
    }
    if digits.len() % 2 != 0 {
        return Err(format!("Odd number of hex digits in '{}'", s));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| format!("Invalid hex value '{}': {}", s, e))
        })
        .collect()
}

/// Parse a transaction step: `w:HEX`, `r:N`, `t:HEX` or `d:US`
pub fn parse_operation(s: &str) -> Result<Operation, String> {
    let (kind, arg) = s
        .split_once(':')
        .ok_or_else(|| format!("Expected KIND:ARG, got '{}'", s))?;
    match kind {
        "w" | "write" => parse_hex_bytes(arg).map(Operation::Write),
        "t" | "transfer" => parse_hex_bytes(arg).map(Operation::Transfer),
        "r" | "read" => arg
            .parse()
            .map(Operation::Read)
            .map_err(|e| format!("Invalid word count '{}': {}", arg, e)),
        "d" | "delay" => arg
            .parse()
            .map(Operation::Delay)
            .map_err(|e| format!("Invalid delay '{}': {}", arg, e)),
        _ => Err(format!("Unknown operation '{}' (expected w, r, t or d)", kind)),
    }
}

#[derive(Parser)]
#[command(name = "spi-arbiter")]
#[command(author, version, about = "Shared SPI bus arbitration", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Access policy file (TOML format). Everything is allowed without one.
    #[arg(long, global = true)]
    pub policy: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Bus settings shared by the data commands
#[derive(clap::Args, Debug, Clone)]
pub struct WireArgs {
    /// Bus label
    #[arg(short, long, default_value = "spi0")]
    pub bus: String,

    /// Chip select label (claims a controller instead of the whole bus)
    #[arg(short, long)]
    pub cs: Option<String>,

    /// SPI mode (0-3 or mode0-mode3)
    #[arg(short, long, default_value = "0")]
    pub mode: Mode,

    /// Bits per word (1-64)
    #[arg(short, long, default_value_t = 8)]
    pub word_size: u64,

    /// Clock frequency in Hz
    #[arg(short, long, default_value_t = spi_arbiter_core::config::DEFAULT_FREQUENCY_HZ)]
    pub frequency: u64,

    /// Delay after chip select assert, in microseconds
    #[arg(long, default_value_t = 0)]
    pub delay: u64,
}

impl WireArgs {
    /// Build the resource configuration
    pub fn to_config(&self) -> SpiConfig {
        let config = SpiConfig::new(&self.bus)
            .with_mode(self.mode)
            .with_word_size(self.word_size)
            .with_frequency(self.frequency)
            .with_transmission_delay(self.delay);
        match &self.cs {
            Some(cs) => config.with_cs(cs),
            None => config,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show clock timing for every SPI mode
    Modes,

    /// Check whether a claim would be granted
    Check {
        /// Bus label
        #[arg(short, long)]
        bus: String,

        /// Chip select label (checks a controller claim)
        #[arg(short, long, conflicts_with = "peripheral")]
        cs: Option<String>,

        /// Check a peripheral claim instead of exclusive bus ownership
        #[arg(long)]
        peripheral: bool,
    },

    /// Full-duplex transfer on a simulated loopback bus
    Transfer {
        #[command(flatten)]
        wire: WireArgs,

        /// Bytes to send (hex, a whole number of words)
        data: String,
    },

    /// Run a transaction on a simulated loopback bus
    Transaction {
        #[command(flatten)]
        wire: WireArgs,

        /// Steps: w:HEX (write), r:N (read N words), t:HEX (transfer), d:US (delay)
        #[arg(required = true, value_parser = parse_operation)]
        ops: Vec<Operation>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_bytes() {
        assert_eq!(parse_hex_bytes("9f").unwrap(), vec![0x9F]);
        assert_eq!(parse_hex_bytes("0xDEAD").unwrap(), vec![0xDE, 0xAD]);
        assert_eq!(parse_hex_bytes("01:02:03").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_hex_bytes("").unwrap(), Vec::<u8>::new());
        assert!(parse_hex_bytes("abc").is_err());
        assert!(parse_hex_bytes("zz").is_err());
    }

    #[test]
    fn test_parse_operation() {
        assert_eq!(parse_operation("w:9f").unwrap(), Operation::Write(vec![0x9F]));
        assert_eq!(parse_operation("r:3").unwrap(), Operation::Read(3));
        assert_eq!(
            parse_operation("transfer:0102").unwrap(),
            Operation::Transfer(vec![1, 2])
        );
        assert_eq!(parse_operation("d:100").unwrap(), Operation::Delay(100));
        assert!(parse_operation("x:00").is_err());
        assert!(parse_operation("r:-1").is_err());
        assert!(parse_operation("w").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::parse_from([
            "spi-arbiter",
            "-v",
            "transaction",
            "--cs",
            "cs0",
            "--mode",
            "mode3",
            "w:9f",
            "r:3",
        ]);
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Transaction { wire, ops } => {
                assert_eq!(wire.mode, Mode::Mode3);
                let config = wire.to_config();
                assert_eq!(config.bus, "spi0");
                assert_eq!(config.cs_pin.as_deref(), Some("cs0"));
                assert_eq!(ops, vec![Operation::Write(vec![0x9F]), Operation::Read(3)]);
            }
            _ => panic!("expected transaction"),
        }
    }
}
