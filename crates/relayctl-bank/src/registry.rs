//! Backend registry
//!
//! Turns a backend string such as `ftdi:frequency=1000000` into a
//! [`DeviceConnector`] configured from the relay configuration. Which
//! backends exist depends on the enabled cargo features.

use std::collections::HashMap;

use relayctl_core::config::Config;
use relayctl_core::device::DeviceConnector;
use relayctl_core::error::{Error, Result};

/// Parsed backend string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendParams {
    /// Backend name
    pub name: String,
    /// Backend-specific options
    pub params: HashMap<String, String>,
}

impl BackendParams {
    /// Options in the form the backend crates' `parse_options` expect
    pub fn options(&self) -> Vec<(&str, &str)> {
        self.params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}

/// Parse a backend string like `"ftdi:frequency=1000000,timeout_ms=200"`
pub fn parse_backend_params(s: &str) -> Result<BackendParams> {
    let (name, opts_str) = s.split_once(':').unwrap_or((s, ""));
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Config("empty backend name".into()));
    }

    let mut params = HashMap::new();
    if !opts_str.is_empty() {
        for opt in opts_str.split(',') {
            if let Some((key, value)) = opt.split_once('=') {
                params.insert(key.trim().to_string(), value.trim().to_string());
            } else {
                return Err(Error::Config(format!(
                    "invalid backend option '{}' (expected key=value)",
                    opt
                )));
            }
        }
    }

    Ok(BackendParams {
        name: name.to_string(),
        params,
    })
}

/// Open the connector a backend string names
///
/// `auto` picks the FT232H backend when a matching adapter is attached and
/// falls back to the simulator otherwise.
pub fn open_connector(backend: &str, config: &Config) -> Result<Box<dyn DeviceConnector>> {
    let params = parse_backend_params(backend)?;

    match params.name.as_str() {
        "auto" => open_auto(&params, config),

        #[cfg(feature = "dummy")]
        "dummy" | "sim" => open_dummy(&params, config),

        #[cfg(feature = "ftdi")]
        "ftdi" | "ft232h" => open_ftdi(&params, config),

        _ => Err(Error::Config(format!(
            "unknown backend '{}' (available: {})",
            params.name,
            backend_names_short()
        ))),
    }
}

fn open_auto(params: &BackendParams, config: &Config) -> Result<Box<dyn DeviceConnector>> {
    #[cfg(feature = "ftdi")]
    {
        let identity = config.identity();
        match relayctl_ftdi::list_adapters(identity.vendor_id, identity.product_id) {
            Ok(adapters) if !adapters.is_empty() => {
                log::debug!("Found {} adapter(s) matching {}", adapters.len(), identity);
                return open_ftdi(params, config);
            }
            Ok(_) => log::debug!("No adapter matching {} attached", identity),
            Err(e) => log::warn!("USB enumeration failed: {}", e),
        }
    }

    simulation_fallback(params, config)
}

#[cfg(feature = "dummy")]
fn simulation_fallback(params: &BackendParams, config: &Config) -> Result<Box<dyn DeviceConnector>> {
    log::warn!("No FT232H adapter attached, running in simulation mode");
    open_dummy(params, config)
}

#[cfg(not(feature = "dummy"))]
fn simulation_fallback(
    _params: &BackendParams,
    _config: &Config,
) -> Result<Box<dyn DeviceConnector>> {
    Err(Error::Config(
        "no adapter attached and the simulator is not compiled in".into(),
    ))
}

#[cfg(feature = "ftdi")]
fn open_ftdi(params: &BackendParams, config: &Config) -> Result<Box<dyn DeviceConnector>> {
    use relayctl_ftdi::{parse_options, Ft232hConfig, Ft232hConnector};

    let base = Ft232hConfig::default()
        .frequency(config.device.frequency_hz)?
        .idle_level(config.relay_map()?.idle_level());
    let ftdi_config = parse_options(&params.options(), base)?;

    log::info!(
        "Using FT232H backend ({} Hz MPSSE clock)",
        ftdi_config.frequency_hz()
    );
    Ok(Box::new(Ft232hConnector::new(ftdi_config)))
}

#[cfg(feature = "dummy")]
fn open_dummy(params: &BackendParams, config: &Config) -> Result<Box<dyn DeviceConnector>> {
    use relayctl_sim::{parse_options, SimConfig, SimulatedBank};

    let identity = config.identity();
    let base = SimConfig {
        idle_level: config.relay_map()?.idle_level(),
        vendor_id: identity.vendor_id,
        product_id: identity.product_id,
        serial: identity.serial,
        ..SimConfig::default()
    };
    let sim_config = parse_options(&params.options(), base)?;

    log::info!("Using simulated relay bank ({} lines)", sim_config.lines);
    Ok(Box::new(SimulatedBank::new(sim_config).connector()))
}

/// Information about a backend
#[derive(Debug, Clone)]
pub struct BackendInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Backends enabled at compile time
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_backends() -> Vec<BackendInfo> {
    let mut backends = Vec::new();

    #[cfg(feature = "ftdi")]
    backends.push(BackendInfo {
        name: "ftdi",
        aliases: &["ft232h"],
        description: "FT232H MPSSE GPIO relay adapter (frequency=<Hz>,timeout_ms=<ms>)",
    });

    #[cfg(feature = "dummy")]
    backends.push(BackendInfo {
        name: "dummy",
        aliases: &["sim"],
        description: "In-memory simulated relay bank (lines=<N>,readback=<on|off>)",
    });

    backends
}

/// Short list of backend names for CLI help
pub fn backend_names_short() -> String {
    let backends = available_backends();
    if backends.is_empty() {
        return "none (recompile with features)".to_string();
    }
    let mut names: Vec<&str> = backends.iter().map(|b| b.name).collect();
    names.push("auto");
    names.join(", ")
}
