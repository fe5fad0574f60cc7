//! Error types for the FT232H backend

use thiserror::Error;

use relayctl_core::Error as CoreError;

/// Result type for FT232H operations
pub type Result<T> = std::result::Result<T, FtdiError>;

/// Errors that can occur while talking to an FT232H
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FtdiError {
    /// Failed to open the adapter
    #[error("failed to open adapter: {0}")]
    OpenFailed(String),

    /// USB transfer failed
    #[error("USB transfer failed: {message}")]
    TransferFailed {
        /// libftdi/libusb message
        message: String,
        /// Whether the adapter went away
        disconnected: bool,
    },

    /// Adapter did not answer a read in time
    #[error("read timed out after {0} ms")]
    Timeout(u64),

    /// Failed to configure the MPSSE engine
    #[error("failed to configure adapter: {0}")]
    ConfigFailed(String),

    /// Invalid option value
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// USB enumeration error
    #[error("USB error: {0}")]
    UsbError(String),
}

impl FtdiError {
    /// Build a transfer error, classifying the message
    pub fn transfer(message: impl Into<String>) -> Self {
        let message = message.into();
        let disconnected = looks_disconnected(&message);
        FtdiError::TransferFailed {
            message,
            disconnected,
        }
    }
}

/// libusb reports an unplugged adapter as "no device" / "no such device"
fn looks_disconnected(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("no device")
        || message.contains("no such device")
        || message.contains("device has been disconnected")
}

impl From<nusb::Error> for FtdiError {
    fn from(e: nusb::Error) -> Self {
        FtdiError::UsbError(e.to_string())
    }
}

impl From<ftdi::Error> for FtdiError {
    fn from(e: ftdi::Error) -> Self {
        FtdiError::transfer(e.to_string())
    }
}

impl From<FtdiError> for CoreError {
    fn from(e: FtdiError) -> Self {
        match e {
            FtdiError::TransferFailed {
                message,
                disconnected: true,
            } => CoreError::disconnected(message),
            FtdiError::TransferFailed { message, .. } => CoreError::io(message),
            FtdiError::Timeout(_) | FtdiError::UsbError(_) => CoreError::io(e.to_string()),
            FtdiError::ConfigFailed(msg) => CoreError::ResetFailed(msg),
            FtdiError::OpenFailed(msg) => CoreError::io(format!("open failed: {}", msg)),
            FtdiError::InvalidParameter(msg) => CoreError::Config(msg),
        }
    }
}
