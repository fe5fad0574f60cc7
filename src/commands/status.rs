//! Status command implementation

use std::time::SystemTime;

use relayctl_bank::RelayBank;

use super::format_state;

/// Print the state record of every relay
pub fn cmd_status(bank: &RelayBank) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "Adapter {} via {} ({})",
        bank.identity(),
        bank.backend(),
        if bank.is_connected() {
            "connected"
        } else {
            "not connected"
        }
    );
    println!();
    println!(
        "{:<12} {:>4}  {:<9} {:<9} {}",
        "Relay", "Line", "Commanded", "Confirmed", "Changed"
    );
    println!("{}", "-".repeat(52));

    let now = SystemTime::now();
    for (relay, (id, status)) in bank.map().iter().zip(bank.snapshot()) {
        let changed = status
            .last_change
            .and_then(|t| now.duration_since(t).ok())
            .map_or_else(|| "-".to_string(), |age| format!("{:.1}s ago", age.as_secs_f64()));
        let marker = if status.is_settled() { "" } else { " (pending)" };
        println!(
            "{:<12} {:>4}  {:<9} {:<9} {}{}",
            id,
            relay.line,
            format_state(status.commanded),
            format_state(status.confirmed),
            changed,
            marker
        );
    }
    Ok(())
}
