//! Error types for relayctl-core
//!
//! A single error type is shared by the device backends, the relay map, the
//! executor and the configuration loader so that a failure reaching the
//! caller always carries its kind plus the relay and attempt count involved.

use thiserror::Error;

use crate::device::{DeviceIdentity, Level, LineAddress};
use crate::map::RelayId;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // Acquisition errors
    /// No attached adapter matches the requested identity
    #[error("no adapter matching {0} found")]
    DeviceNotFound(DeviceIdentity),

    /// A matching adapter is attached but cannot be claimed
    #[error("adapter {0} is busy (claimed by another process or handle)")]
    DeviceBusy(DeviceIdentity),

    /// The adapter rejected the reset sequence
    #[error("adapter reset failed: {0}")]
    ResetFailed(String),

    // Transport errors
    /// USB transfer or handle failure
    #[error("I/O error: {message}")]
    Io {
        /// Human readable description of the failure
        message: String,
        /// Whether the failure indicates the connection was dropped
        disconnected: bool,
    },

    /// Read-back after a write returned a different level
    #[error("read-back mismatch on line {line}: expected {expected}, found {found}")]
    ReadbackMismatch {
        /// Line that was written
        line: LineAddress,
        /// Level that was written
        expected: Level,
        /// Level read back from the adapter
        found: Level,
    },

    /// The adapter cannot read line levels back
    #[error("adapter does not support line read-back")]
    ReadbackUnsupported,

    /// Line address outside the adapter's range
    #[error("line {line} is out of range (adapter has {count} lines)")]
    InvalidLine {
        /// Requested line
        line: LineAddress,
        /// Number of lines on the adapter
        count: u8,
    },

    // Mapping errors
    /// Relay identifier is not part of the configured map
    #[error("unknown relay '{0}'")]
    UnknownRelay(RelayId),

    /// Relay map configuration is ambiguous or inconsistent
    #[error("invalid relay mapping: {0}")]
    InvalidMapping(String),

    // Executor errors
    /// Retries exhausted; the relay state was left untouched
    #[error("relay '{relay}' unavailable after {attempts} attempt(s): {last_error}")]
    DeviceUnavailable {
        /// Relay the command targeted
        relay: RelayId,
        /// Number of attempts made
        attempts: u32,
        /// The failure of the final attempt
        last_error: Box<Error>,
    },

    /// Another command is currently using the adapter
    #[error("another command is in flight")]
    Busy,

    /// The bank has been shut down
    #[error("relay bank is shut down")]
    Closed,

    // Configuration errors
    /// Configuration file could not be read or parsed
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Error::Io {
            message: message.into(),
            disconnected: false,
        }
    }

    /// Build an I/O error that indicates the adapter went away
    pub fn disconnected(message: impl Into<String>) -> Self {
        Error::Io {
            message: message.into(),
            disconnected: true,
        }
    }

    /// Error returned by operations on a closed or poisoned handle
    pub fn handle_closed() -> Self {
        Error::io("device handle is closed")
    }

    /// Whether the executor may retry the operation that produced this error
    ///
    /// Acquisition failures, a rejected reset included, are not transient:
    /// the adapter is absent, held elsewhere or refusing configuration, and
    /// retrying within a single command will not change that.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Io { .. } | Error::ReadbackMismatch { .. })
    }

    /// Whether the error means the adapter dropped off the bus
    ///
    /// Reported with [`Event::DeviceLost`](crate::events::Event::DeviceLost)
    /// so an unplugged adapter can be told apart from a failed transfer.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Error::Io {
                disconnected: true,
                ..
            }
        )
    }
}

/// Result type alias using the core Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::io("stall").is_transient());
        assert!(Error::disconnected("gone").is_transient());
        assert!(!Error::ResetFailed("nak".into()).is_transient());
        assert!(Error::ReadbackMismatch {
            line: 0,
            expected: Level::Low,
            found: Level::High
        }
        .is_transient());
        assert!(!Error::DeviceNotFound(DeviceIdentity::ft232h()).is_transient());
        assert!(!Error::DeviceBusy(DeviceIdentity::ft232h()).is_transient());
        assert!(!Error::UnknownRelay(RelayId::from("X")).is_transient());
        assert!(!Error::Busy.is_transient());
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(Error::disconnected("gone").is_disconnect());
        assert!(!Error::io("stall").is_disconnect());
        assert!(!Error::handle_closed().is_disconnect());
        assert!(!Error::DeviceNotFound(DeviceIdentity::ft232h()).is_disconnect());
    }

    #[test]
    fn test_unavailable_message_names_relay_and_attempts() {
        let err = Error::DeviceUnavailable {
            relay: RelayId::from("3"),
            attempts: 3,
            last_error: Box::new(Error::disconnected("pipe error")),
        };
        let msg = err.to_string();
        assert!(msg.contains("'3'"));
        assert!(msg.contains("3 attempt(s)"));
        assert!(msg.contains("pipe error"));
    }
}
