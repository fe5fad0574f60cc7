//! relayctl - Relay bank control for FT232H adapters
//!
//! Switches relays wired to the GPIO lines of an FTDI FT232H, one at a time,
//! several at once, or from CSV sequence files.
//!
//! Every subcommand except `shell` opens the adapter, does its work and
//! releases the adapter again on exit, which switches all relays off. The
//! shell keeps the adapter open until it ends.
//!
//! # Architecture
//!
//! The binary only talks to `relayctl-bank`, which opens a backend by name
//! and hands back a `RelayBank`:
//! - **ftdi** - the real adapter, driven through MPSSE
//! - **dummy** - an in-memory bank, used automatically (simulation mode)
//!   when no adapter is attached and `--backend auto` is in effect
//!
//! Commands, retries and recovery after the adapter drops off the bus are
//! handled by the core executor; the CLI just reports results.

mod cli;
mod commands;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands};
use relayctl_bank::RelayBank;
use relayctl_core::config::Config;
use relayctl_core::events::LogSink;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::List => commands::list_backends(&config),
        Commands::Relays => commands::list_relays(&config),
        Commands::Check { file } => commands::cmd_check(&config, &file),
        Commands::Status => {
            let bank = open_bank(config, &cli.backend)?;
            commands::cmd_status(&bank)?;
            println!();
            println!("(state after opening and resetting the adapter)");
            Ok(())
        }
        Commands::Set { relay, state, hold } => {
            let bank = open_bank(config, &cli.backend)?;
            commands::cmd_set(&bank, &relay, &state)?;
            if hold {
                commands::hold_until_enter()?;
            } else {
                log::warn!(
                    "Relays are released when relayctl exits; use --hold or `relayctl shell` to keep them set"
                );
            }
            Ok(())
        }
        Commands::Pulse { relay, duration_ms } => {
            let bank = open_bank(config, &cli.backend)?;
            commands::cmd_pulse(&bank, &relay, duration_ms)
        }
        Commands::Press {
            relays,
            duration_ms,
        } => {
            let bank = open_bank(config, &cli.backend)?;
            commands::cmd_press(&bank, &relays, duration_ms)
        }
        Commands::Test { duration_ms } => {
            let bank = open_bank(config, &cli.backend)?;
            commands::cmd_test(&bank, duration_ms)
        }
        Commands::Off => {
            let bank = open_bank(config, &cli.backend)?;
            commands::cmd_off(&bank)
        }
        Commands::Run {
            file,
            abort_on_failure,
        } => {
            let bank = open_bank(config, &cli.backend)?;
            commands::cmd_run(&bank, &file, abort_on_failure)
        }
        #[cfg(feature = "shell")]
        Commands::Shell { script } => {
            let bank = open_bank(config, &cli.backend)?;
            commands::cmd_shell(&bank, script.as_deref())
        }
    }
}

fn open_bank(config: Config, backend: &str) -> Result<RelayBank, Box<dyn std::error::Error>> {
    let bank = RelayBank::open(config, backend, Arc::new(LogSink))?;
    log::debug!("Opened {:?}", bank);
    Ok(bank)
}

/// Load the configuration from the specified path or default locations
fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        // User specified a path
        if !path.is_file() {
            return Err(format!("Configuration file not found: {}", path.display()).into());
        }
        return Ok(Config::from_file(path)?);
    }

    let default_paths = [
        PathBuf::from("relayctl.toml"),
        PathBuf::from("/etc/relayctl/relayctl.toml"),
    ];

    for file in &default_paths {
        if file.is_file() {
            log::debug!("Loading configuration from {}", file.display());
            return Ok(Config::from_file(file)?);
        }
    }

    log::debug!("No configuration file found, using the reference wiring");
    Ok(Config::default())
}
