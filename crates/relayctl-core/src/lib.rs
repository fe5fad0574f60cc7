//! relayctl-core - Core library for relay bank control
//!
//! This crate holds everything that does not depend on a particular adapter:
//! the device traits, the relay map, the state store, the command executor
//! with its retry and recovery policy, and CSV batch sequences.
//!
//! Backends (`relayctl-ftdi`, `relayctl-sim`) implement
//! [`device::DeviceConnector`] and [`device::RelayDevice`]; the executor
//! drives them.
//!
//! # Example
//!
//! ```ignore
//! use relayctl_core::{config::Config, events::LogSink, executor::CommandExecutor};
//!
//! let config = Config::from_file("relays.toml")?;
//! let executor = CommandExecutor::new(
//!     Box::new(connector),
//!     config.identity(),
//!     Arc::new(config.relay_map()?),
//!     config.executor_options(),
//!     Arc::new(LogSink),
//! )?;
//! executor.connect()?;
//! executor.execute(&"pump".into(), RelayState::On)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cancel;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod executor;
pub mod map;
pub mod sequence;
pub mod state;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
