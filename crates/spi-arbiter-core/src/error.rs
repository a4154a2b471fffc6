//! Error types for spi-arbiter-core
//!
//! Every fallible call in this crate returns one [`SpiError`] kind. The set is
//! closed: hardware faults come from the backend unchanged, arbitration faults
//! come from the registry, and usage faults are raised by the resources
//! themselves.

use thiserror::Error;

/// SPI error kinds
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpiError {
    // Hardware faults (passed through from the backend)
    /// The backend reported an unrecoverable hardware failure
    #[error("hardware fault")]
    HardwareFault,
    /// Received data was not consumed before new data arrived
    #[error("data overrun")]
    Overrun,
    /// Multiple controllers tried to drive the bus at once
    #[error("mode fault")]
    ModeFault,
    /// The received frame did not match the expected format
    #[error("frame format error")]
    FrameFormat,
    /// Chip select could not be driven, or was lost mid-transfer
    #[error("chip select fault")]
    ChipSelectFault,

    // Arbitration faults (raised by the registry)
    /// The bus or chip select is already claimed
    #[error("resource already in use")]
    AlreadyInUse,
    /// The access policy rejected this bus/chip select combination
    #[error("access not allowed by policy")]
    NotAllowed,

    // Usage faults (raised by the core)
    /// The operation is not supported by this resource or backend
    #[error("operation not supported")]
    OperationNotSupported,
    /// The data length is not a whole number of words
    #[error("wrong amount of data")]
    WrongAmountOfData,
    /// The resource is not enabled for this operation
    #[error("not enabled")]
    NotEnabled,
    /// The handle was released or invalidated
    #[error("resource invalidated")]
    ResourceInvalidated,

    /// Backend specific condition
    #[error("{0}")]
    Other(String),
}

impl SpiError {
    /// Returns true for faults that originate from the hardware backend
    pub fn is_hardware(&self) -> bool {
        matches!(
            self,
            Self::HardwareFault
                | Self::Overrun
                | Self::ModeFault
                | Self::FrameFormat
                | Self::ChipSelectFault
                | Self::Other(_)
        )
    }
}

/// Result type alias using [`SpiError`]
pub type Result<T> = std::result::Result<T, SpiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(SpiError::AlreadyInUse.to_string(), "resource already in use");
        assert_eq!(SpiError::Other("bad dma".into()).to_string(), "bad dma");
    }

    #[test]
    fn test_is_hardware() {
        assert!(SpiError::Overrun.is_hardware());
        assert!(SpiError::ChipSelectFault.is_hardware());
        assert!(!SpiError::NotAllowed.is_hardware());
        assert!(!SpiError::WrongAmountOfData.is_hardware());
    }
}
