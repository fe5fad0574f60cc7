//! Device trait definitions
//!
//! A backend provides two pieces:
//!
//! - a [`DeviceConnector`] that knows how to find and claim adapters, and
//! - the [`RelayDevice`] handle it hands out for one claimed adapter.
//!
//! The executor owns at most one handle at a time and goes back to the
//! connector whenever a handle has to be thrown away after an I/O failure.
//!
//! ## Failure semantics
//!
//! Handles never retry. The first failed transfer marks the handle unusable
//! and every later call fails fast with [`Error::Io`](crate::Error::Io). The
//! retry policy lives entirely in the executor.
//!
//! ## Example: minimal backend
//!
//! ```ignore
//! impl RelayDevice for MyAdapter {
//!     fn line_count(&self) -> u8 { 8 }
//!     fn is_open(&self) -> bool { self.port.is_some() }
//!     fn last_reset(&self) -> Option<Instant> { self.last_reset }
//!
//!     fn reset(&mut self) -> Result<()> {
//!         self.port()?.send(&[CMD_RESET]).map_err(|e| Error::ResetFailed(e.to_string()))?;
//!         self.last_reset = Some(Instant::now());
//!         Ok(())
//!     }
//!
//!     fn write_line(&mut self, line: LineAddress, level: Level) -> Result<()> {
//!         self.port()?.send(&[CMD_SET, line, level.is_high() as u8])
//!     }
//!
//!     fn close(&mut self) { self.port = None; }
//! }
//! ```

use std::time::Instant;

use super::{DeviceIdentity, Level, LineAddress};
use crate::error::{Error, Result};

/// One open, exclusively claimed adapter
pub trait RelayDevice: Send {
    /// Number of addressable output lines
    fn line_count(&self) -> u8;

    /// Whether the handle is open and has not failed
    fn is_open(&self) -> bool;

    /// Time of the last successful reset, if any
    fn last_reset(&self) -> Option<Instant>;

    /// Force the adapter into its known line configuration
    ///
    /// All lines become outputs driven to their idle level. Calling this more
    /// than once only re-applies the same configuration.
    fn reset(&mut self) -> Result<()>;

    /// Drive a single line high or low
    fn write_line(&mut self, line: LineAddress, level: Level) -> Result<()>;

    /// Drive several lines as one transaction
    ///
    /// Backends that can update their whole output register at once
    /// override this so the lines switch together. The default writes the
    /// lines one after another and stops at the first failure.
    fn write_lines(&mut self, lines: &[(LineAddress, Level)]) -> Result<()> {
        for &(line, level) in lines {
            self.write_line(line, level)?;
        }
        Ok(())
    }

    /// Whether [`read_line`](Self::read_line) is available
    fn supports_readback(&self) -> bool {
        false
    }

    /// Read back the current level of a line
    ///
    /// Adapters without read-back keep the default, in which case confirmed
    /// state means "write acknowledged".
    fn read_line(&mut self, line: LineAddress) -> Result<Level> {
        let _ = line;
        Err(Error::ReadbackUnsupported)
    }

    /// Release the adapter
    ///
    /// Safe to call on an already closed handle.
    fn close(&mut self);
}

/// Discovery and acquisition of adapters for one backend
pub trait DeviceConnector: Send {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Number of lines an adapter from this backend provides
    fn line_count(&self) -> u8;

    /// Enumerate attached adapters and claim the one matching `identity`
    ///
    /// Fails with [`Error::DeviceNotFound`] when nothing matches and with
    /// [`Error::DeviceBusy`] when a match exists but cannot be claimed.
    /// The returned handle has not been reset yet.
    fn acquire(&mut self, identity: &DeviceIdentity) -> Result<Box<dyn RelayDevice>>;
}
