//! Resource configuration

use crate::codec::{self, Word};
use crate::error::{Result, SpiError};
use crate::mode::{Mode, Timing};

/// Default clock ceiling in Hz (1 MHz)
pub const DEFAULT_FREQUENCY_HZ: u64 = 1_000_000;

/// Default word size in bits
pub const DEFAULT_WORD_SIZE: u64 = 8;

/// Configuration used to construct a Bus, Controller or Peripheral
///
/// A resource keeps its own copy; the configuration cannot change after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiConfig {
    /// Bus label (e.g., "spi0")
    pub bus: String,
    /// Chip select label, required for controllers only
    pub cs_pin: Option<String>,
    /// Upper bound of the clock frequency in Hz
    pub frequency: u64,
    /// Delay in microseconds between CS assertion and the first clock
    pub transmission_delay: u64,
    /// Bits per word
    pub word_size: u64,
    /// Clock mode
    pub mode: Mode,
}

impl SpiConfig {
    /// Create a configuration for the given bus with default settings
    pub fn new(bus: impl Into<String>) -> Self {
        Self {
            bus: bus.into(),
            cs_pin: None,
            frequency: DEFAULT_FREQUENCY_HZ,
            transmission_delay: 0,
            word_size: DEFAULT_WORD_SIZE,
            mode: Mode::default(),
        }
    }

    /// Set the chip select label
    pub fn with_cs(mut self, cs: impl Into<String>) -> Self {
        self.cs_pin = Some(cs.into());
        self
    }

    /// Set the clock frequency ceiling in Hz
    pub fn with_frequency(mut self, hz: u64) -> Self {
        self.frequency = hz;
        self
    }

    /// Set the delay between CS assertion and the first clock, in microseconds
    pub fn with_transmission_delay(mut self, us: u64) -> Self {
        self.transmission_delay = us;
        self
    }

    /// Set the word size in bits
    pub fn with_word_size(mut self, bits: u64) -> Self {
        self.word_size = bits;
        self
    }

    /// Set the clock mode
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Validate the settings that do not depend on the resource kind
    pub fn validate(&self) -> Result<()> {
        codec::check_word_size(self.word_size)?;
        if self.frequency == 0 || self.bus.is_empty() {
            return Err(SpiError::OperationNotSupported);
        }
        if self.cs_pin.as_deref() == Some("") {
            return Err(SpiError::OperationNotSupported);
        }
        Ok(())
    }

    /// Wire format handed to the backend
    pub fn wire_format(&self) -> WireFormat {
        WireFormat {
            timing: self.mode.timing(),
            word_size: self.word_size,
            frequency: self.frequency,
        }
    }
}

/// Everything a backend needs to clock words onto the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireFormat {
    /// Resolved clock timing
    pub timing: Timing,
    /// Bits per word
    pub word_size: u64,
    /// Clock frequency ceiling in Hz
    pub frequency: u64,
}

impl WireFormat {
    /// Number of buffer bytes per word
    pub fn word_bytes(&self) -> usize {
        codec::word_bytes(self.word_size)
    }

    /// Mask covering the valid bits of a word
    pub fn mask(&self) -> Word {
        codec::word_mask(self.word_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ClockEdge;

    #[test]
    fn test_builder() {
        let config = SpiConfig::new("spi0")
            .with_cs("cs1")
            .with_frequency(4_000_000)
            .with_transmission_delay(10)
            .with_word_size(12)
            .with_mode(Mode::Mode3);
        assert_eq!(config.bus, "spi0");
        assert_eq!(config.cs_pin.as_deref(), Some("cs1"));
        assert_eq!(config.frequency, 4_000_000);
        assert_eq!(config.transmission_delay, 10);
        assert!(config.validate().is_ok());

        let wire = config.wire_format();
        assert_eq!(wire.word_bytes(), 2);
        assert_eq!(wire.mask(), 0xFFF);
        assert_eq!(wire.timing.sample_edge, ClockEdge::Falling);
        assert_eq!(wire.timing.cs_to_first_bit, 1);
    }

    #[test]
    fn test_validate() {
        let bad = SpiConfig::new("spi0").with_word_size(0);
        assert_eq!(bad.validate(), Err(SpiError::OperationNotSupported));
        let bad = SpiConfig::new("spi0").with_word_size(65);
        assert_eq!(bad.validate(), Err(SpiError::OperationNotSupported));
        let bad = SpiConfig::new("spi0").with_frequency(0);
        assert_eq!(bad.validate(), Err(SpiError::OperationNotSupported));
        let bad = SpiConfig::new("");
        assert_eq!(bad.validate(), Err(SpiError::OperationNotSupported));
        let bad = SpiConfig::new("spi0").with_cs("");
        assert_eq!(bad.validate(), Err(SpiError::OperationNotSupported));
    }
}
