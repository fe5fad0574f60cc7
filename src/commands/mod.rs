//! CLI command implementations
//!
//! Every command works on a [`RelayBank`](relayctl_bank::RelayBank) or, for
//! the commands that never touch the adapter, directly on the loaded
//! configuration.

mod control;
mod list;
mod run;
#[cfg(feature = "shell")]
mod shell;
mod status;

pub use control::{cmd_off, cmd_press, cmd_pulse, cmd_set, cmd_test, hold_until_enter};
pub use list::{list_backends, list_relays};
pub use run::{cmd_check, cmd_run};
#[cfg(feature = "shell")]
pub use shell::cmd_shell;
pub use status::cmd_status;

use relayctl_core::map::{RelayId, RelayMap};

/// Failures the CLI reports on top of the core errors
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Some relays did not reach the requested state
    #[error("{failed} of {total} relay(s) could not be switched")]
    RelaysFailed {
        /// Number of failed commands
        failed: usize,
        /// Number of commands issued
        total: usize,
    },

    /// A sequence run finished with failed steps
    #[error("sequence finished with {failed} failed step(s) out of {total}")]
    SequenceFailed {
        /// Number of failed steps
        failed: usize,
        /// Number of steps in the sequence
        total: usize,
    },

    /// The sequence file did not validate
    #[error("sequence file {0} is invalid")]
    InvalidSequence(String),
}

/// Resolve a command-line relay argument (identifier or label)
fn relay_arg(map: &RelayMap, arg: &str) -> RelayId {
    map.lookup(arg)
        .map(|relay| relay.id.clone())
        .unwrap_or_else(|| RelayId::new(arg))
}

fn format_state(state: Option<relayctl_core::map::RelayState>) -> String {
    state.map_or_else(|| "-".to_string(), |s| s.to_string())
}
