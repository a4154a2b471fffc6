//! SPI clock modes
//!
//! A [`Mode`] combines the clock edge used for sampling with the delay between
//! chip select assertion and the first valid bit. The resolved [`Timing`] is
//! handed to the backend with every transfer; it never changes how the
//! resources or the transaction engine sequence their calls.

use core::fmt;
use core::str::FromStr;

use crate::error::SpiError;

/// Clock edge
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClockEdge {
    /// Low to high transition
    Rising,
    /// High to low transition
    Falling,
}

impl ClockEdge {
    /// Returns the other edge of the same clock pulse
    pub const fn opposite(self) -> Self {
        match self {
            Self::Rising => Self::Falling,
            Self::Falling => Self::Rising,
        }
    }
}

/// SPI mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Sample on falling edge, first bit valid at CS assertion
    #[default]
    Mode0,
    /// Sample on rising edge, first bit valid one clock after CS assertion
    Mode1,
    /// Sample on rising edge, first bit valid at CS assertion
    Mode2,
    /// Sample on falling edge, first bit valid one clock after CS assertion
    Mode3,
}

/// Bit timing resolved from a [`Mode`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Timing {
    /// Edge on which the receiver samples a bit
    pub sample_edge: ClockEdge,
    /// Edge on which the transmitter drives a bit
    pub drive_edge: ClockEdge,
    /// Clock cycles between CS assertion and the first valid bit (0 or 1)
    pub cs_to_first_bit: u8,
}

impl Mode {
    /// All modes in numeric order
    pub const ALL: [Mode; 4] = [Mode::Mode0, Mode::Mode1, Mode::Mode2, Mode::Mode3];

    /// Returns the numeric mode (0-3)
    pub const fn number(self) -> u8 {
        match self {
            Self::Mode0 => 0,
            Self::Mode1 => 1,
            Self::Mode2 => 2,
            Self::Mode3 => 3,
        }
    }

    /// Create a mode from its number
    pub const fn from_number(n: u8) -> Option<Self> {
        match n {
            0 => Some(Self::Mode0),
            1 => Some(Self::Mode1),
            2 => Some(Self::Mode2),
            3 => Some(Self::Mode3),
            _ => None,
        }
    }

    /// Resolve the sampling/driving rules for this mode
    ///
    /// The controller and the peripheral share the same timing: whichever
    /// side receives samples on `sample_edge`, whichever side transmits
    /// drives on `drive_edge`.
    pub const fn timing(self) -> Timing {
        let (sample_edge, cs_to_first_bit) = match self {
            Self::Mode0 => (ClockEdge::Falling, 0),
            Self::Mode1 => (ClockEdge::Rising, 1),
            Self::Mode2 => (ClockEdge::Rising, 0),
            Self::Mode3 => (ClockEdge::Falling, 1),
        };
        Timing {
            sample_edge,
            drive_edge: sample_edge.opposite(),
            cs_to_first_bit,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mode{}", self.number())
    }
}

impl fmt::Display for ClockEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rising => write!(f, "rising"),
            Self::Falling => write!(f, "falling"),
        }
    }
}

impl FromStr for Mode {
    type Err = SpiError;

    /// Accepts `0`..`3` or `mode0`..`mode3` (case-insensitive)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let digits = s.strip_prefix("mode").unwrap_or(&s);
        digits
            .parse::<u8>()
            .ok()
            .and_then(Self::from_number)
            .ok_or(SpiError::OperationNotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_table() {
        let t = Mode::Mode0.timing();
        assert_eq!(t.sample_edge, ClockEdge::Falling);
        assert_eq!(t.drive_edge, ClockEdge::Rising);
        assert_eq!(t.cs_to_first_bit, 0);

        let t = Mode::Mode1.timing();
        assert_eq!(t.sample_edge, ClockEdge::Rising);
        assert_eq!(t.cs_to_first_bit, 1);

        let t = Mode::Mode2.timing();
        assert_eq!(t.sample_edge, ClockEdge::Rising);
        assert_eq!(t.cs_to_first_bit, 0);

        let t = Mode::Mode3.timing();
        assert_eq!(t.sample_edge, ClockEdge::Falling);
        assert_eq!(t.drive_edge, ClockEdge::Rising);
        assert_eq!(t.cs_to_first_bit, 1);
    }

    #[test]
    fn test_parse() {
        assert_eq!("0".parse::<Mode>().unwrap(), Mode::Mode0);
        assert_eq!("mode3".parse::<Mode>().unwrap(), Mode::Mode3);
        assert_eq!("Mode2".parse::<Mode>().unwrap(), Mode::Mode2);
        assert_eq!(
            "4".parse::<Mode>().unwrap_err(),
            SpiError::OperationNotSupported
        );
        assert!("fast".parse::<Mode>().is_err());
    }

    #[test]
    fn test_number_roundtrip() {
        for mode in Mode::ALL {
            assert_eq!(Mode::from_number(mode.number()), Some(mode));
        }
        assert_eq!(Mode::Mode1.to_string(), "mode1");
    }
}
