//! FT232H relay adapter
//!
//! This module provides the [`Ft232hConnector`] that finds and claims an
//! FT232H, and the [`Ft232h`] handle that drives its GPIO lines through the
//! MPSSE engine.

use core::fmt;
use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use ftdi::{find_by_vid_pid, BitMode, Device, Interface};
use relayctl_core::device::{DeviceConnector, DeviceIdentity, Level, LineAddress, RelayDevice};
use relayctl_core::error::{Error as CoreError, Result as CoreResult};

use crate::error::{FtdiError, Result};
use crate::protocol::*;

/// Default time to wait for a `GET_BITS` answer
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Configuration for claiming an FT232H
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ft232hConfig {
    /// MPSSE clock divisor
    pub divisor: u16,
    /// Levels driven on every line by reset
    pub idle_levels: u16,
    /// Read-back timeout
    pub read_timeout: Duration,
}

impl Default for Ft232hConfig {
    fn default() -> Self {
        Ft232hConfig {
            // 6 MHz
            divisor: 4,
            idle_levels: 0xFFFF,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl Ft232hConfig {
    /// Set the MPSSE clock
    pub fn frequency(mut self, frequency_hz: u32) -> Result<Self> {
        self.divisor = divisor_for(frequency_hz)?;
        Ok(self)
    }

    /// Drive every line to `level` on reset
    pub fn idle_level(mut self, level: Level) -> Self {
        self.idle_levels = if level.is_high() { 0xFFFF } else { 0x0000 };
        self
    }

    /// MPSSE clock in Hz
    pub fn frequency_hz(&self) -> u32 {
        frequency_for(self.divisor)
    }
}

/// One FT232H seen on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// USB bus number
    pub bus: u8,
    /// USB device address
    pub address: u8,
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
    /// Serial number, if readable
    pub serial: Option<String>,
    /// Product string, if readable
    pub product: Option<String>,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bus {:03} Device {:03}: {:04x}:{:04x}",
            self.bus, self.address, self.vendor_id, self.product_id
        )?;
        if let Some(product) = &self.product {
            write!(f, " {}", product)?;
        }
        if let Some(serial) = &self.serial {
            write!(f, " (serial {})", serial)?;
        }
        Ok(())
    }
}

/// List attached adapters with the given VID/PID
pub fn list_adapters(vendor_id: u16, product_id: u16) -> Result<Vec<AdapterInfo>> {
    let mut adapters = Vec::new();

    for dev in nusb::list_devices()? {
        if dev.vendor_id() != vendor_id || dev.product_id() != product_id {
            continue;
        }
        adapters.push(AdapterInfo {
            bus: dev.bus_number(),
            address: dev.device_address(),
            vendor_id: dev.vendor_id(),
            product_id: dev.product_id(),
            serial: dev.serial_number().map(str::to_string),
            product: dev.product_string().map(str::to_string),
        });
    }

    Ok(adapters)
}

/// Finds and claims FT232H adapters
#[derive(Debug, Clone, Default)]
pub struct Ft232hConnector {
    config: Ft232hConfig,
}

impl Ft232hConnector {
    /// Create a connector
    pub fn new(config: Ft232hConfig) -> Self {
        Self { config }
    }

    /// Configuration handed to every claimed adapter
    pub fn config(&self) -> &Ft232hConfig {
        &self.config
    }
}

impl DeviceConnector for Ft232hConnector {
    fn name(&self) -> &'static str {
        "ftdi"
    }

    fn line_count(&self) -> u8 {
        FT232H_LINES
    }

    fn acquire(&mut self, identity: &DeviceIdentity) -> CoreResult<Box<dyn RelayDevice>> {
        let attached = list_adapters(identity.vendor_id, identity.product_id)?;
        let matching = attached
            .iter()
            .filter(|a| identity.matches(a.vendor_id, a.product_id, a.serial.as_deref()))
            .count();
        if matching == 0 {
            return Err(CoreError::DeviceNotFound(identity.clone()));
        }

        // libftdi opens the first VID/PID match, so a serial can only be
        // honoured when that match is the only candidate
        if identity.serial.is_some() && attached.len() > 1 {
            return Err(CoreError::Config(format!(
                "{} adapters {:04x}:{:04x} attached; cannot select serial {} among them",
                attached.len(),
                identity.vendor_id,
                identity.product_id,
                identity.serial.as_deref().unwrap_or_default()
            )));
        }

        match Ft232h::open(identity, &self.config) {
            Ok(handle) => Ok(Box::new(handle)),
            Err(e) => {
                log::debug!("Adapter {} is attached but could not be opened: {}", identity, e);
                Err(CoreError::DeviceBusy(identity.clone()))
            }
        }
    }
}

/// Claimed FT232H driving relay lines
pub struct Ft232h {
    /// libftdi device context; `None` once closed
    device: Option<Device>,
    divisor: u16,
    idle_levels: u16,
    read_timeout: Duration,
    /// Shadow of the output register
    levels: u16,
    failed: bool,
    last_reset: Option<Instant>,
}

// SAFETY: the libftdi context is owned exclusively by this handle and is
// only ever touched through `&mut self`, so moving it to another thread
// cannot create shared access.
unsafe impl Send for Ft232h {}

impl Ft232h {
    /// Open channel A of the adapter matching `identity`
    ///
    /// The adapter is not reset yet.
    pub fn open(identity: &DeviceIdentity, config: &Ft232hConfig) -> Result<Self> {
        log::debug!(
            "Looking for FT232H VID={:04X} PID={:04X}",
            identity.vendor_id,
            identity.product_id
        );

        let device = find_by_vid_pid(identity.vendor_id, identity.product_id)
            .interface(Interface::A)
            .open()
            .map_err(|e| FtdiError::OpenFailed(e.to_string()))?;

        log::info!("Opened FT232H {}", identity);

        Ok(Ft232h {
            device: Some(device),
            divisor: config.divisor,
            idle_levels: config.idle_levels,
            read_timeout: config.read_timeout,
            levels: config.idle_levels,
            failed: false,
            last_reset: None,
        })
    }

    /// Current shadow of the output register
    pub fn levels(&self) -> u16 {
        self.levels
    }

    fn device(&mut self) -> CoreResult<&mut Device> {
        if self.failed {
            return Err(CoreError::handle_closed());
        }
        self.device.as_mut().ok_or_else(CoreError::handle_closed)
    }

    /// Run a transfer, marking the handle unusable if it fails
    fn transfer<T>(&mut self, op: impl FnOnce(&mut Device) -> Result<T>) -> CoreResult<T> {
        let device = self.device()?;
        match op(device) {
            Ok(value) => Ok(value),
            Err(e) => {
                log::debug!("FT232H transfer failed: {}", e);
                self.failed = true;
                Err(e.into())
            }
        }
    }
}

impl RelayDevice for Ft232h {
    fn line_count(&self) -> u8 {
        FT232H_LINES
    }

    fn is_open(&self) -> bool {
        self.device.is_some() && !self.failed
    }

    fn last_reset(&self) -> Option<Instant> {
        self.last_reset
    }

    fn reset(&mut self) -> CoreResult<()> {
        let divisor = self.divisor;
        let idle = self.idle_levels;
        self.transfer(|device| configure(device, divisor, idle))?;

        self.levels = idle;
        self.last_reset = Some(Instant::now());
        log::debug!(
            "FT232H reset: MPSSE at {} Hz, lines idle at 0x{:04X}",
            frequency_for(divisor),
            idle
        );
        Ok(())
    }

    fn write_line(&mut self, line: LineAddress, level: Level) -> CoreResult<()> {
        let levels = apply_levels(self.levels, &[(line, level)])?;
        self.transfer(|device| send(device, &set_line_bits(line, levels)))?;
        self.levels = levels;
        Ok(())
    }

    fn write_lines(&mut self, lines: &[(LineAddress, Level)]) -> CoreResult<()> {
        let levels = apply_levels(self.levels, lines)?;
        self.transfer(|device| send(device, &set_bits(levels, ALL_OUTPUTS)))?;
        self.levels = levels;
        Ok(())
    }

    fn supports_readback(&self) -> bool {
        true
    }

    fn read_line(&mut self, line: LineAddress) -> CoreResult<Level> {
        if line >= FT232H_LINES {
            return Err(CoreError::InvalidLine {
                line,
                count: FT232H_LINES,
            });
        }
        let timeout = self.read_timeout;
        let mut buf = [0u8; 2];
        self.transfer(|device| {
            send(device, &READ_BITS)?;
            recv(device, &mut buf, timeout)
        })?;
        let value = u16::from_le_bytes(buf);
        Ok(Level::from_bit(value & (1 << line) != 0))
    }

    fn close(&mut self) {
        if let Some(mut device) = self.device.take() {
            // Return lines to inputs so the relay board falls back to its pull-ups
            if !self.failed {
                if let Err(e) = send(&mut device, &release_bits()) {
                    log::warn!("Failed to release pins on close: {}", e);
                }
            }
            log::debug!("FT232H closed");
        }
    }
}

impl Drop for Ft232h {
    fn drop(&mut self) {
        self.close();
    }
}

/// Output register after driving `lines` from `levels`
fn apply_levels(mut levels: u16, lines: &[(LineAddress, Level)]) -> CoreResult<u16> {
    for &(line, level) in lines {
        if line >= FT232H_LINES {
            return Err(CoreError::InvalidLine {
                line,
                count: FT232H_LINES,
            });
        }
        let mask = 1u16 << line;
        levels = if level.is_high() {
            levels | mask
        } else {
            levels & !mask
        };
    }
    Ok(levels)
}

/// Bring the adapter into MPSSE mode with every line driven to `idle`
fn configure(device: &mut Device, divisor: u16, idle: u16) -> Result<()> {
    device
        .usb_reset()
        .map_err(|e| FtdiError::ConfigFailed(format!("USB reset failed: {}", e)))?;
    device
        .set_latency_timer(LATENCY_TIMER_MS)
        .map_err(|e| FtdiError::ConfigFailed(format!("Set latency timer failed: {}", e)))?;
    device
        .set_bitmode(0x00, BitMode::Reset)
        .map_err(|e| FtdiError::ConfigFailed(format!("Bit mode reset failed: {}", e)))?;
    device
        .set_bitmode(0x00, BitMode::Mpsse)
        .map_err(|e| FtdiError::ConfigFailed(format!("Set MPSSE mode failed: {}", e)))?;
    send(device, &init_sequence(divisor, idle))
        .map_err(|e| FtdiError::ConfigFailed(format!("MPSSE init failed: {}", e)))
}

/// Send data to the adapter
fn send(device: &mut Device, data: &[u8]) -> Result<()> {
    device
        .write_all(data)
        .map_err(|e| FtdiError::transfer(format!("write failed: {}", e)))?;
    log::trace!("Sent {} bytes: {:02X?}", data.len(), data);
    Ok(())
}

/// Fill `buf` from the adapter, giving up after `timeout`
fn recv(device: &mut Device, buf: &mut [u8], timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut total = 0;

    while total < buf.len() {
        match device.read(&mut buf[total..]) {
            Ok(0) => {
                if Instant::now() >= deadline {
                    return Err(FtdiError::Timeout(timeout.as_millis() as u64));
                }
                // No data available, wait a bit
                thread::sleep(Duration::from_micros(100));
            }
            Ok(n) => total += n,
            Err(e) => return Err(FtdiError::transfer(format!("read failed: {}", e))),
        }
    }

    log::trace!("Received {} bytes: {:02X?}", total, buf);
    Ok(())
}

/// Parse backend options into a configuration
///
/// Supported options:
/// - `frequency=<Hz>` - MPSSE clock (default 6000000)
/// - `timeout_ms=<ms>` - read-back timeout (default 500)
pub fn parse_options(options: &[(&str, &str)], mut config: Ft232hConfig) -> Result<Ft232hConfig> {
    for (key, value) in options {
        match *key {
            "frequency" | "freq" => {
                let hz: u32 = value.parse().map_err(|_| {
                    FtdiError::InvalidParameter(format!("Invalid frequency '{}'", value))
                })?;
                config = config.frequency(hz)?;
            }
            "timeout_ms" => {
                let ms: u64 = value.parse().map_err(|_| {
                    FtdiError::InvalidParameter(format!("Invalid timeout '{}'", value))
                })?;
                config.read_timeout = Duration::from_millis(ms);
            }
            _ => {
                log::warn!("Unknown FTDI option: {}={}", key, value);
            }
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Ft232hConfig::default();
        assert_eq!(config.frequency_hz(), 6_000_000);
        assert_eq!(config.idle_levels, 0xFFFF);
        assert_eq!(config.clone().idle_level(Level::Low).idle_levels, 0x0000);
    }

    #[test]
    fn test_parse_options() {
        let config = parse_options(
            &[("frequency", "1000000"), ("timeout_ms", "50"), ("bogus", "1")],
            Ft232hConfig::default(),
        )
        .unwrap();
        assert_eq!(config.divisor, 29);
        assert_eq!(config.read_timeout, Duration::from_millis(50));

        assert!(parse_options(&[("frequency", "fast")], Ft232hConfig::default()).is_err());
        assert!(parse_options(&[("frequency", "40000000")], Ft232hConfig::default()).is_err());
    }

    #[test]
    fn test_apply_levels() {
        // Active-low chord: lines 1 and 5 pulled low together
        assert_eq!(
            apply_levels(0xFFFF, &[(1, Level::Low), (5, Level::Low)]).unwrap(),
            0xFFDD
        );
        assert_eq!(apply_levels(0x0000, &[(9, Level::High)]).unwrap(), 0x0200);
        assert!(matches!(
            apply_levels(0xFFFF, &[(2, Level::Low), (16, Level::Low)]),
            Err(CoreError::InvalidLine { line: 16, .. })
        ));
    }

    #[test]
    fn test_adapter_display() {
        let info = AdapterInfo {
            bus: 1,
            address: 7,
            vendor_id: 0x0403,
            product_id: 0x6014,
            serial: Some("FT4ABC".into()),
            product: Some("C232HM-DDHSL-0".into()),
        };
        assert_eq!(
            info.to_string(),
            "Bus 001 Device 007: 0403:6014 C232HM-DDHSL-0 (serial FT4ABC)"
        );
    }
}
