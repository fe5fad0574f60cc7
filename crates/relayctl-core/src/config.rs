//! TOML configuration
//!
//! Every section is optional; missing values fall back to the reference
//! wiring (ten relays `0`..`9` on lines 0..9, active-low).
//!
//! ```toml
//! [device]
//! vendor_id = 0x0403
//! product_id = 0x6014
//! serial = "FT4ABCDE"
//! frequency_hz = 6_000_000
//!
//! [bank]
//! active_low = true
//! release_on_shutdown = true
//! verify_writes = true
//!
//! [retry]
//! attempts = 3
//! backoff_ms = 50
//!
//! [sequence]
//! delay_unit = "seconds"
//! header = true
//! columns = ["relay", "state", "delay"]
//! abort_on_failure = false
//! pulse_ms = 500
//! sweep_gap_ms = 200
//!
//! [[relay]]
//! id = "pump"
//! line = 0
//! label = "Main pump"
//!
//! [[relay]]
//! id = 1
//! line = "0x01"
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

use crate::device::{DeviceIdentity, LineAddress, FT232H_PID, FTDI_VID};
use crate::error::{Error, Result};
use crate::executor::{ExecutorOptions, RetryPolicy, DEFAULT_ATTEMPTS, DEFAULT_SWEEP_GAP};
use crate::map::{reference_relays, LogicalRelay, Polarity, RelayId, RelayMap};
use crate::sequence::{DelayUnit, FailurePolicy, SequenceFormat};

/// Default MPSSE clock
pub const DEFAULT_FREQUENCY_HZ: u32 = 6_000_000;

/// Default press duration for `pulse`
pub const DEFAULT_PULSE_MS: u64 = 500;

/// Complete configuration file
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Adapter selection
    pub device: DeviceConfig,
    /// Bank behaviour
    pub bank: BankConfig,
    /// Retry policy
    pub retry: RetryConfig,
    /// Sequence file format
    pub sequence: SequenceConfig,
    /// Relay wiring; empty means the reference wiring
    #[serde(rename = "relay")]
    pub relays: Vec<RelayConfig>,
}

/// `[device]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// USB vendor ID
    #[serde(deserialize_with = "deserialize_hex")]
    pub vendor_id: u16,
    /// USB product ID
    #[serde(deserialize_with = "deserialize_hex")]
    pub product_id: u16,
    /// Serial number to narrow the match
    pub serial: Option<String>,
    /// MPSSE clock frequency
    #[serde(deserialize_with = "deserialize_hex")]
    pub frequency_hz: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: FTDI_VID,
            product_id: FT232H_PID,
            serial: None,
            frequency_hz: DEFAULT_FREQUENCY_HZ,
        }
    }
}

/// `[bank]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BankConfig {
    /// A low line energises a relay
    pub active_low: bool,
    /// Drive all relays off before releasing the adapter
    pub release_on_shutdown: bool,
    /// Read lines back after writing when supported
    pub verify_writes: bool,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            active_low: true,
            release_on_shutdown: true,
            verify_writes: true,
        }
    }
}

/// `[retry]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts per command
    pub attempts: u32,
    /// Backoff unit between attempts
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            backoff_ms: 50,
        }
    }
}

/// `[sequence]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SequenceConfig {
    /// Unit of the delay column
    pub delay_unit: DelayUnit,
    /// First row is a header
    pub header: bool,
    /// Header column names
    pub columns: [String; 3],
    /// Stop a run at the first failed step
    pub abort_on_failure: bool,
    /// Press duration for `pulse`
    pub pulse_ms: u64,
    /// Pause between relays when sweeping the bank
    pub sweep_gap_ms: u64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        let format = SequenceFormat::default();
        Self {
            delay_unit: format.delay_unit,
            header: format.header,
            columns: format.columns,
            abort_on_failure: false,
            pulse_ms: DEFAULT_PULSE_MS,
            sweep_gap_ms: DEFAULT_SWEEP_GAP.as_millis() as u64,
        }
    }
}

/// `[[relay]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Identifier, a name or an integer index
    pub id: RelayKey,
    /// Adapter line
    #[serde(deserialize_with = "deserialize_hex")]
    pub line: LineAddress,
    /// Display label
    #[serde(default)]
    pub label: Option<String>,
}

/// Relay identifier as written in the configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RelayKey {
    /// `id = 3`
    Index(u32),
    /// `id = "pump"`
    Name(String),
}

impl From<&RelayKey> for RelayId {
    fn from(key: &RelayKey) -> Self {
        match key {
            RelayKey::Index(index) => RelayId::from(*index),
            RelayKey::Name(name) => RelayId::from(name.as_str()),
        }
    }
}

impl Config {
    /// Load a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse a configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.retry.attempts == 0 {
            return Err(Error::Config("retry.attempts must be at least 1".into()));
        }
        if self.device.frequency_hz == 0 {
            return Err(Error::Config("device.frequency_hz must be non-zero".into()));
        }
        if self.sequence.columns.iter().any(|c| c.trim().is_empty()) {
            return Err(Error::Config("sequence.columns must not be empty".into()));
        }
        Ok(())
    }

    /// Adapter identity to acquire
    pub fn identity(&self) -> DeviceIdentity {
        let identity = DeviceIdentity::new(self.device.vendor_id, self.device.product_id);
        match &self.device.serial {
            Some(serial) => identity.with_serial(serial.clone()),
            None => identity,
        }
    }

    /// Bank polarity
    pub fn polarity(&self) -> Polarity {
        if self.bank.active_low {
            Polarity::ActiveLow
        } else {
            Polarity::ActiveHigh
        }
    }

    /// Build and validate the relay map
    pub fn relay_map(&self) -> Result<RelayMap> {
        let relays = if self.relays.is_empty() {
            reference_relays()
        } else {
            self.relays
                .iter()
                .map(|relay| LogicalRelay {
                    id: RelayId::from(&relay.id),
                    line: relay.line,
                    label: relay.label.clone(),
                })
                .collect()
        };
        RelayMap::new(relays, self.polarity())
    }

    /// Executor options
    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            retry: RetryPolicy::new(
                self.retry.attempts,
                Duration::from_millis(self.retry.backoff_ms),
            ),
            verify_writes: self.bank.verify_writes,
            release_on_shutdown: self.bank.release_on_shutdown,
        }
    }

    /// Sequence file format
    pub fn sequence_format(&self) -> SequenceFormat {
        SequenceFormat {
            header: self.sequence.header,
            columns: self.sequence.columns.clone(),
            delay_unit: self.sequence.delay_unit,
        }
    }

    /// Failure policy for sequence runs
    pub fn failure_policy(&self) -> FailurePolicy {
        if self.sequence.abort_on_failure {
            FailurePolicy::AbortOnFirstFailure
        } else {
            FailurePolicy::Continue
        }
    }

    /// Default press duration
    pub fn pulse_duration(&self) -> Duration {
        Duration::from_millis(self.sequence.pulse_ms)
    }

    /// Pause between relays when sweeping the bank
    pub fn sweep_gap(&self) -> Duration {
        Duration::from_millis(self.sequence.sweep_gap_ms)
    }
}

/// Deserialize an integer that can be hex (0x...) or decimal
fn deserialize_hex<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Int(u64),
        Str(String),
    }

    let value = match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => n,
        HexOrInt::Str(s) => parse_number(&s).map_err(D::Error::custom)?,
    };
    T::try_from(value).map_err(|_| D::Error::custom(format!("value {} is out of range", value)))
}

/// Parse a number that can be hex (0x...) or decimal
fn parse_number(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim().replace('_', "");
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}
