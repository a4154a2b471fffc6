//! Hardware backend interface
//!
//! A backend drives the physical lines of one bus. The registry owns one
//! backend per bus label and serializes every call into it, so
//! implementations never see two transfers interleaved.
//!
//! Errors returned by a backend are passed to the client unmodified. Use the
//! hardware kinds (`HardwareFault`, `Overrun`, `ModeFault`, `FrameFormat`,
//! `ChipSelectFault`) where they apply and `Other` for anything else.

use bitflags::bitflags;

use crate::codec::Word;
use crate::config::WireFormat;
use crate::error::{Result, SpiError};
use crate::mode::Timing;

bitflags! {
    /// Backend capability flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BackendFeatures: u32 {
        /// Can clock words in without clocking words out
        const HALF_DUPLEX_READ = 1 << 0;
        /// Drives chip select lines (required for controllers)
        const CHIP_SELECT      = 1 << 1;
        /// Can act as a peripheral reacting to an external controller
        const PERIPHERAL       = 1 << 2;
    }
}

impl Default for BackendFeatures {
    fn default() -> Self {
        BackendFeatures::empty()
    }
}

/// Hardware backend for one bus
///
/// ## Example
///
/// ```ignore
/// impl SpiBackend for Spidev {
///     fn features(&self) -> BackendFeatures {
///         BackendFeatures::CHIP_SELECT | BackendFeatures::HALF_DUPLEX_READ
///     }
///
///     fn transfer(&mut self, wire: &WireFormat, write: &[Word], read: &mut [Word]) -> Result<()> {
///         self.ioctl_transfer(wire.word_size, wire.frequency, write, read)
///             .map_err(|_| SpiError::HardwareFault)
///     }
///     // ...
/// }
/// ```
pub trait SpiBackend: Send {
    /// Get the features supported by this backend
    fn features(&self) -> BackendFeatures;

    /// Drive a chip select line (`active = true` selects the device)
    fn set_cs(&mut self, cs: &str, active: bool) -> Result<()>;

    /// Clock words out, discarding whatever comes back
    fn write(&mut self, wire: &WireFormat, words: &[Word]) -> Result<()>;

    /// Clock words in without driving data
    ///
    /// Only called when `HALF_DUPLEX_READ` is advertised.
    fn read(&mut self, wire: &WireFormat, words: &mut [Word]) -> Result<()>;

    /// Full-duplex transfer; `write` and `read` have the same length
    fn transfer(&mut self, wire: &WireFormat, write: &[Word], read: &mut [Word]) -> Result<()>;

    /// Delay for the specified number of microseconds
    fn delay_us(&mut self, us: u64);

    /// Poll the externally driven chip select (peripheral mode)
    fn peripheral_selected(&mut self) -> Result<bool> {
        Err(SpiError::OperationNotSupported)
    }

    /// Sample the next incoming bit (peripheral mode)
    ///
    /// Blocks until the controller clocks the bit. Returns `ChipSelectFault`
    /// if chip select is released while waiting.
    fn peripheral_read_bit(&mut self, _timing: &Timing) -> Result<bool> {
        Err(SpiError::OperationNotSupported)
    }

    /// Drive the outgoing bit for the current cycle (peripheral mode)
    fn peripheral_write_bit(&mut self, _timing: &Timing, _bit: bool) -> Result<()> {
        Err(SpiError::OperationNotSupported)
    }

    /// Whether an error leaves the claiming handle unusable
    ///
    /// When this returns true the registry invalidates the claim and every
    /// further call on the handle fails with `ResourceInvalidated`.
    fn is_fatal(&self, _err: &SpiError) -> bool {
        false
    }
}
