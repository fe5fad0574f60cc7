//! Events emitted by the core
//!
//! The executor and the sequence runner report every lifecycle transition
//! through an [`EventSink`]. Persisting or displaying them is up to the
//! caller: [`LogSink`] forwards to the `log` facade, a
//! `std::sync::mpsc::Sender<Event>` turns them into a stream, and
//! [`EventLog`] keeps them in memory.

use core::fmt;
use std::sync::mpsc::Sender;

use parking_lot::Mutex;

use crate::device::DeviceIdentity;
use crate::map::{RelayId, RelayState};

/// Something the core did or observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// An adapter was claimed
    Acquired {
        /// Identity that was requested
        identity: DeviceIdentity,
    },
    /// Acquisition failed
    AcquireFailed {
        /// Identity that was requested
        identity: DeviceIdentity,
        /// Why it failed
        error: String,
    },
    /// The adapter was reset into its idle configuration
    Reset {
        /// Identity of the adapter
        identity: DeviceIdentity,
    },
    /// A relay reached the requested state
    CommandSucceeded {
        /// Relay that was commanded
        relay: RelayId,
        /// State reached
        state: RelayState,
        /// Attempts beyond the first
        retries: u32,
    },
    /// A relay command gave up
    CommandFailed {
        /// Relay that was commanded
        relay: RelayId,
        /// State requested
        state: RelayState,
        /// Attempts made
        attempts: u32,
        /// Final error
        error: String,
    },
    /// One sequence step finished
    StepCompleted {
        /// Zero-based step index
        index: usize,
        /// Source row in the sequence file
        row: u64,
        /// Relay the step targeted
        relay: RelayId,
        /// Requested state
        state: RelayState,
        /// Error text if the step failed
        error: Option<String>,
    },
    /// The open handle failed and was discarded
    DeviceLost {
        /// Failure that caused the loss
        reason: String,
        /// The adapter dropped off the bus rather than failing a transfer
        disconnected: bool,
    },
    /// A handle was re-acquired after a loss
    DeviceRecovered {
        /// Identity of the adapter
        identity: DeviceIdentity,
    },
    /// The adapter was released at shutdown
    Closed,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Acquired { identity } => write!(f, "acquired adapter {}", identity),
            Event::AcquireFailed { identity, error } => {
                write!(f, "failed to acquire adapter {}: {}", identity, error)
            }
            Event::Reset { identity } => write!(f, "reset adapter {}", identity),
            Event::CommandSucceeded {
                relay,
                state,
                retries,
            } => {
                write!(f, "relay {} -> {}", relay, state)?;
                if *retries > 0 {
                    write!(f, " ({} retr{})", retries, if *retries == 1 { "y" } else { "ies" })?;
                }
                Ok(())
            }
            Event::CommandFailed {
                relay,
                state,
                attempts,
                error,
            } => write!(
                f,
                "relay {} -> {} failed after {} attempt(s): {}",
                relay, state, attempts, error
            ),
            Event::StepCompleted {
                index,
                row,
                relay,
                state,
                error,
            } => match error {
                None => write!(f, "step {} (row {}): {} -> {} ok", index + 1, row, relay, state),
                Some(e) => write!(
                    f,
                    "step {} (row {}): {} -> {} failed: {}",
                    index + 1,
                    row,
                    relay,
                    state,
                    e
                ),
            },
            Event::DeviceLost {
                reason,
                disconnected: true,
            } => write!(f, "adapter disconnected: {}", reason),
            Event::DeviceLost { reason, .. } => write!(f, "adapter handle failed: {}", reason),
            Event::DeviceRecovered { identity } => write!(f, "adapter {} recovered", identity),
            Event::Closed => write!(f, "adapter released"),
        }
    }
}

/// Receiver of core events
pub trait EventSink: Send + Sync {
    /// Deliver one event
    fn emit(&self, event: Event);
}

/// Sink that forwards events to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: Event) {
        match &event {
            Event::AcquireFailed { .. } | Event::DeviceLost { .. } => log::warn!("{}", event),
            Event::CommandFailed { .. } => log::error!("{}", event),
            Event::StepCompleted { error: Some(_), .. } => log::warn!("{}", event),
            Event::CommandSucceeded { .. } | Event::StepCompleted { .. } => {
                log::debug!("{}", event)
            }
            _ => log::info!("{}", event),
        }
    }
}

/// Sink that discards events
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Sink that records events in memory
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all recorded events
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Remove and return all recorded events
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: Event) {
        self.events.lock().push(event);
    }
}

impl EventSink for Mutex<Sender<Event>> {
    fn emit(&self, event: Event) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.lock().send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_log_records_in_order() {
        let log = EventLog::new();
        log.emit(Event::DeviceLost {
            reason: "unplugged".into(),
            disconnected: true,
        });
        log.emit(Event::Closed);
        assert_eq!(log.events().len(), 2);
        assert_eq!(log.take()[1], Event::Closed);
        assert!(log.events().is_empty());
    }

    #[test]
    fn test_channel_sink() {
        let (tx, rx) = std::sync::mpsc::channel();
        let sink = Mutex::new(tx);
        sink.emit(Event::Closed);
        assert_eq!(rx.recv().unwrap(), Event::Closed);
    }

    #[test]
    fn test_display_retries() {
        let event = Event::CommandSucceeded {
            relay: "A".into(),
            state: RelayState::On,
            retries: 2,
        };
        assert_eq!(event.to_string(), "relay A -> on (2 retries)");
    }

    #[test]
    fn test_display_device_lost() {
        let unplugged = Event::DeviceLost {
            reason: "pipe error".into(),
            disconnected: true,
        };
        assert_eq!(unplugged.to_string(), "adapter disconnected: pipe error");
        let stalled = Event::DeviceLost {
            reason: "timeout".into(),
            disconnected: false,
        };
        assert_eq!(stalled.to_string(), "adapter handle failed: timeout");
    }
}
