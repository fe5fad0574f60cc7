//! Adapter identity used for discovery

use core::fmt;

/// FTDI vendor ID
pub const FTDI_VID: u16 = 0x0403;

/// FT232H product ID (single channel)
pub const FT232H_PID: u16 = 0x6014;

/// USB identity of the adapter to acquire
///
/// Resolved once when the bank is opened and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
    /// Serial number filter for disambiguating several attached units
    pub serial: Option<String>,
}

impl DeviceIdentity {
    /// Identity with an explicit VID/PID pair
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            serial: None,
        }
    }

    /// The reference FT232H adapter (0403:6014)
    pub fn ft232h() -> Self {
        Self::new(FTDI_VID, FT232H_PID)
    }

    /// Narrow the identity to one serial number
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Check whether an enumerated device matches this identity
    ///
    /// A device that does not report a serial never matches a serial filter.
    pub fn matches(&self, vendor_id: u16, product_id: u16, serial: Option<&str>) -> bool {
        if vendor_id != self.vendor_id || product_id != self.product_id {
            return false;
        }
        match &self.serial {
            Some(wanted) => serial == Some(wanted.as_str()),
            None => true,
        }
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self::ft232h()
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)?;
        if let Some(serial) = &self.serial {
            write!(f, " (serial {})", serial)?;
        }
        Ok(())
    }
}
