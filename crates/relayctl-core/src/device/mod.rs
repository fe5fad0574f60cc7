//! Adapter abstraction
//!
//! The rest of the core talks to hardware only through [`DeviceConnector`]
//! (discovery and acquisition) and [`RelayDevice`] (one open handle). Both are
//! synchronous; backends that wrap asynchronous drivers adapt them behind
//! these traits.

mod identity;
mod traits;

pub use identity::*;
pub use traits::*;

use core::fmt;

/// Adapter-level GPIO index driving one relay
pub type LineAddress = u8;

/// Electrical level of a GPIO line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Line driven low
    Low,
    /// Line driven high
    High,
}

impl Level {
    /// Level encoded as a bit in an output register
    pub fn from_bit(bit: bool) -> Self {
        if bit {
            Level::High
        } else {
            Level::Low
        }
    }

    /// Whether the line is high
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

impl core::ops::Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => write!(f, "low"),
            Level::High => write!(f, "high"),
        }
    }
}
