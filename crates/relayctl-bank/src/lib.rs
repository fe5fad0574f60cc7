//! relayctl-bank - Backend registry and relay bank handle
//!
//! The CLI and other callers only talk to this crate: it opens an adapter
//! by backend name, wires it to the core executor using the loaded
//! configuration, and hands back a [`RelayBank`].
//!
//! # Example
//!
//! ```ignore
//! use relayctl_bank::RelayBank;
//! use relayctl_core::{config::Config, events::LogSink};
//!
//! let config = Config::from_file("relays.toml")?;
//! let bank = RelayBank::open(config, "auto", Arc::new(LogSink))?;
//!
//! bank.set(&"pump".into(), RelayState::On)?;
//! let sequence = bank.load_sequence("startup.csv")?;
//! for step in bank.run_sequence(sequence, None) {
//!     println!("{}: {:?}", step.index, step.outcome.is_ok());
//! }
//! ```
//!
//! # Backends
//!
//! - `ftdi` (feature `ftdi`) - FT232H over libftdi1
//! - `dummy` (feature `dummy`) - in-memory simulated bank
//! - `auto` - `ftdi` if a matching adapter is attached, otherwise `dummy`

mod handle;
mod registry;

pub use handle::RelayBank;
pub use registry::{
    available_backends, backend_names_short, open_connector, parse_backend_params, BackendInfo,
    BackendParams,
};

#[cfg(feature = "ftdi")]
pub use relayctl_ftdi::{list_adapters, AdapterInfo};
