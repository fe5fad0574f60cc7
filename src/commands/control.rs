//! Single-relay and bank-wide commands

use std::io::BufRead;
use std::time::Duration;

use relayctl_bank::RelayBank;
use relayctl_core::error::Result as CoreResult;
use relayctl_core::executor::CommandOutcome;
use relayctl_core::map::{RelayId, RelayState};

use super::{relay_arg, CommandError};

fn report(outcome: &CommandOutcome) {
    let retries = match outcome.retries {
        0 => String::new(),
        n => format!(" after {} retr{}", n, if n == 1 { "y" } else { "ies" }),
    };
    println!(
        "{} (line {}) is {}{}",
        outcome.relay,
        outcome.line,
        super::format_state(outcome.status.confirmed),
        retries
    );
}

/// Print one line per relay, failing if any relay could not be switched
fn report_all(results: &[(RelayId, CoreResult<CommandOutcome>)]) -> Result<(), CommandError> {
    let total = results.len();
    let mut failed = 0;

    for (id, result) in results {
        match result {
            Ok(outcome) => report(outcome),
            Err(e) => {
                failed += 1;
                eprintln!("{}: {}", id, e);
            }
        }
    }

    if failed > 0 {
        return Err(CommandError::RelaysFailed { failed, total });
    }
    Ok(())
}

/// Switch one relay
pub fn cmd_set(
    bank: &RelayBank,
    relay: &str,
    state: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let state: RelayState = state.parse()?;
    let id = relay_arg(bank.map(), relay);
    let outcome = bank.set(&id, state)?;
    report(&outcome);
    Ok(())
}

/// Keep the adapter claimed until a line (or end of input) arrives on stdin
pub fn hold_until_enter() -> Result<(), Box<dyn std::error::Error>> {
    println!("Holding relays; press Enter to release");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(())
}

/// Press several relays together
pub fn cmd_press(
    bank: &RelayBank,
    relays: &[String],
    duration_ms: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let ids: Vec<RelayId> = relays.iter().map(|r| relay_arg(bank.map(), r)).collect();
    let duration = duration_ms.map(Duration::from_millis);
    log::info!(
        "Pressing {} relay(s) together for {} ms",
        ids.len(),
        duration
            .unwrap_or_else(|| bank.config().pulse_duration())
            .as_millis()
    );
    for outcome in bank.press(&ids, duration)? {
        report(&outcome);
    }
    Ok(())
}

/// Pulse every relay in turn
pub fn cmd_test(bank: &RelayBank, duration_ms: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    log::info!(
        "Testing {} relay(s), {} ms apart",
        bank.map().len(),
        bank.config().sweep_gap().as_millis()
    );
    let results = bank.sweep(duration_ms.map(Duration::from_millis));
    report_all(&results)?;
    Ok(())
}

/// Press a relay
pub fn cmd_pulse(
    bank: &RelayBank,
    relay: &str,
    duration_ms: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let id = relay_arg(bank.map(), relay);
    let duration = duration_ms.map(Duration::from_millis);
    log::info!(
        "Pulsing {} for {} ms",
        id,
        duration
            .unwrap_or_else(|| bank.config().pulse_duration())
            .as_millis()
    );
    let outcome = bank.pulse(&id, duration)?;
    report(&outcome);
    Ok(())
}

/// Switch every relay off
pub fn cmd_off(bank: &RelayBank) -> Result<(), Box<dyn std::error::Error>> {
    report_all(&bank.all_off())?;
    Ok(())
}
