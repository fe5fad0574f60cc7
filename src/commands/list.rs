//! List commands implementation

use relayctl_core::config::Config;

/// List compiled-in backends and attached adapters
pub fn list_backends(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Available backends:");
    println!();
    for backend in relayctl_bank::available_backends() {
        println!("  {:<8} - {}", backend.name, backend.description);
        if !backend.aliases.is_empty() {
            println!("             aliases: {}", backend.aliases.join(", "));
        }
    }
    println!("  {:<8} - FT232H if one is attached, otherwise the simulator", "auto");

    list_adapters(config)
}

#[cfg(feature = "ftdi")]
fn list_adapters(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let identity = config.identity();
    let adapters = relayctl_bank::list_adapters(identity.vendor_id, identity.product_id)?;

    println!();
    if adapters.is_empty() {
        println!("No adapters matching {} attached", identity);
        return Ok(());
    }

    println!("Attached adapters:");
    for adapter in &adapters {
        let selected = identity.matches(
            adapter.vendor_id,
            adapter.product_id,
            adapter.serial.as_deref(),
        );
        println!("  {} {}", if selected { "*" } else { " " }, adapter);
    }
    Ok(())
}

#[cfg(not(feature = "ftdi"))]
fn list_adapters(_config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    Ok(())
}

/// Print the relay map
pub fn list_relays(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let map = config.relay_map()?;

    println!(
        "{} relay(s), {:?} (idle level {})",
        map.len(),
        map.polarity(),
        map.idle_level()
    );
    println!();
    println!("{:<12} {:>4}  {}", "Relay", "Line", "Label");
    println!("{}", "-".repeat(40));
    for relay in map.iter() {
        println!(
            "{:<12} {:>4}  {}",
            relay.id,
            relay.line,
            relay.label.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
