//! relayctl-ftdi - FT232H relay adapter
//!
//! Drives a relay bank wired to the sixteen GPIO lines of an FTDI FT232H
//! (ADBUS0-7, ACBUS0-7) using the MPSSE engine through libftdi1. Adapter
//! enumeration goes through `nusb`.
//!
//! # Example
//!
//! ```no_run
//! use relayctl_core::device::{DeviceConnector, DeviceIdentity, Level};
//! use relayctl_ftdi::{Ft232hConfig, Ft232hConnector};
//!
//! let mut connector = Ft232hConnector::new(Ft232hConfig::default().frequency(6_000_000)?);
//! let mut handle = connector.acquire(&DeviceIdentity::ft232h())?;
//! handle.reset()?;
//! // Energise relay 0 on an active-low board
//! handle.write_line(0, Level::Low)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Backend Options
//!
//! When using the CLI, the following options are available:
//!
//! - `frequency=<Hz>` - MPSSE clock (default: 6000000, max 30000000)
//! - `timeout_ms=<ms>` - read-back timeout (default: 500)
//!
//! The adapter serial comes from the `[device]` section of the configuration.
//! Because libftdi opens the first VID/PID match, selecting by serial only
//! works while a single FT232H is attached.

mod device;
mod error;
mod protocol;

pub use device::{
    list_adapters, parse_options, AdapterInfo, Ft232h, Ft232hConfig, Ft232hConnector,
    DEFAULT_READ_TIMEOUT,
};
pub use error::{FtdiError, Result};
pub use protocol::{divisor_for, frequency_for, FT232H_LINES, MAX_FREQUENCY_HZ};
