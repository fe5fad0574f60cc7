//! Relay map types

use core::fmt;
use core::str::FromStr;

use crate::device::{Level, LineAddress};

/// Operator-facing relay identifier
///
/// Names and integer indices are both stored as strings, so `3` in a CSV row
/// and `"3"` in the configuration refer to the same relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelayId(String);

impl RelayId {
    /// Create an identifier, trimming surrounding whitespace
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_string())
    }

    /// The identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RelayId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RelayId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<u32> for RelayId {
    fn from(index: u32) -> Self {
        Self(index.to_string())
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Desired or observed state of a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayState {
    /// Relay de-energised
    Off,
    /// Relay energised
    On,
}

impl RelayState {
    /// Whether the relay is on
    pub fn is_on(self) -> bool {
        self == RelayState::On
    }
}

impl core::ops::Not for RelayState {
    type Output = RelayState;

    fn not(self) -> RelayState {
        match self {
            RelayState::Off => RelayState::On,
            RelayState::On => RelayState::Off,
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayState::Off => write!(f, "off"),
            RelayState::On => write!(f, "on"),
        }
    }
}

/// Error returned when a state string is not recognised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStateError(pub String);

impl fmt::Display for ParseStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid relay state '{}' (expected on/off, 1/0 or true/false)",
            self.0
        )
    }
}

impl std::error::Error for ParseStateError {}

impl FromStr for RelayState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" | "1" | "true" => Ok(RelayState::On),
            "off" | "0" | "false" => Ok(RelayState::Off),
            _ => Err(ParseStateError(s.trim().to_string())),
        }
    }
}

/// How relay states map onto line levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarity {
    /// A low line energises the relay (reference relay board)
    #[default]
    ActiveLow,
    /// A high line energises the relay
    ActiveHigh,
}

impl Polarity {
    /// Line level that puts a relay into `state`
    pub fn level_for(self, state: RelayState) -> Level {
        match (self, state) {
            (Polarity::ActiveLow, RelayState::On) => Level::Low,
            (Polarity::ActiveLow, RelayState::Off) => Level::High,
            (Polarity::ActiveHigh, RelayState::On) => Level::High,
            (Polarity::ActiveHigh, RelayState::Off) => Level::Low,
        }
    }

    /// Relay state implied by a line level
    pub fn state_for(self, level: Level) -> RelayState {
        if self.level_for(RelayState::On) == level {
            RelayState::On
        } else {
            RelayState::Off
        }
    }
}

/// One relay as wired to the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalRelay {
    /// Operator-facing identifier
    pub id: RelayId,
    /// Adapter line driving this relay
    pub line: LineAddress,
    /// Optional human readable label
    pub label: Option<String>,
}

impl LogicalRelay {
    /// Create a relay without a label
    pub fn new(id: impl Into<RelayId>, line: LineAddress) -> Self {
        Self {
            id: id.into(),
            line,
            label: None,
        }
    }

    /// Attach a label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label if set, otherwise the identifier
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(self.id.as_str())
    }
}
