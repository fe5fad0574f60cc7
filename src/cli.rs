//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Generate dynamic help text for the backend argument
fn backend_help() -> String {
    format!(
        "Backend to use, as name[:key=value,...] [available: {}]",
        relayctl_bank::backend_names_short()
    )
}

#[derive(Parser)]
#[command(name = "relayctl")]
#[command(author, version, about = "Relay bank control for FT232H adapters", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (TOML format)
    /// Defaults to ./relayctl.toml, then /etc/relayctl/relayctl.toml,
    /// then the built-in reference wiring
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, default_value = "auto", help = backend_help())]
    pub backend: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List backends and attached FT232H adapters
    List,

    /// Show the relay map
    Relays,

    /// Show the state of every relay
    ///
    /// Opening the adapter resets it, so this shows the state right after
    /// that reset. Run `status` inside the shell to see relays it has set.
    Status,

    /// Switch one relay
    ///
    /// relayctl releases the adapter when it exits, which switches every
    /// relay back off. Use --hold, or the shell, to keep relays set.
    Set {
        /// Relay identifier or label
        relay: String,

        /// Target state (on/off, 1/0, true/false)
        state: String,

        /// Keep the relay set until Enter is pressed
        #[arg(long)]
        hold: bool,
    },

    /// Press a relay: on, wait, off
    Pulse {
        /// Relay identifier or label
        relay: String,

        /// How long to hold the relay on (default from configuration)
        #[arg(short, long)]
        duration_ms: Option<u64>,
    },

    /// Press several relays together (one adapter write for on, one for off)
    Press {
        /// Relay identifiers or labels
        #[arg(required = true)]
        relays: Vec<String>,

        /// How long to hold the relays on (default from configuration)
        #[arg(short, long)]
        duration_ms: Option<u64>,
    },

    /// Pulse every relay in turn to check the wiring
    Test {
        /// How long to hold each relay on (default from configuration)
        #[arg(short, long)]
        duration_ms: Option<u64>,
    },

    /// Switch every relay off
    Off,

    /// Validate a sequence file without touching the adapter
    Check {
        /// Sequence file (CSV)
        file: PathBuf,
    },

    /// Run a sequence file
    Run {
        /// Sequence file (CSV)
        file: PathBuf,

        /// Stop at the first failed step
        #[arg(long)]
        abort_on_failure: bool,
    },

    /// Interactive shell that keeps the adapter open between commands
    #[cfg(feature = "shell")]
    Shell {
        /// Run the shell commands in this file instead of prompting
        #[arg(short, long)]
        script: Option<PathBuf>,
    },
}
