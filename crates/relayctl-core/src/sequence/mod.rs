//! Batch sequences
//!
//! A sequence is an ordered list of relay operations loaded from a CSV file:
//!
//! ```text
//! relay,state,delay
//! # energise the pump, give it a second, then the valve
//! pump,on
//! valve,on,1.0
//! pump,off,0.5
//! ```
//!
//! Parsing validates the whole file before anything touches hardware: every
//! malformed row is collected and reported together. A parsed [`Sequence`] is
//! immutable and is consumed by the [`SequenceRunner`].

mod parser;
mod runner;

pub use parser::{load_sequence, parse_sequence};
pub use runner::{FailurePolicy, SequenceRun, SequenceRunner, StepResult};

use core::fmt;
use core::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::map::{RelayId, RelayState};

/// Longest wait a single step may request (one day)
pub const MAX_STEP_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Unit of the optional delay column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayUnit {
    /// Fractional seconds (`0.5`)
    #[default]
    Seconds,
    /// Milliseconds (`500`)
    Milliseconds,
}

impl DelayUnit {
    /// Convert a delay value into a duration
    ///
    /// Negative and NaN values, and delays above [`MAX_STEP_DELAY`], are
    /// rejected.
    pub fn to_duration(self, value: f64) -> Option<Duration> {
        let secs = match self {
            DelayUnit::Seconds => value,
            DelayUnit::Milliseconds => value / 1000.0,
        };
        Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|delay| *delay <= MAX_STEP_DELAY)
    }
}

impl FromStr for DelayUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "seconds" => Ok(DelayUnit::Seconds),
            "ms" | "milliseconds" => Ok(DelayUnit::Milliseconds),
            other => Err(format!(
                "unknown delay unit '{}' (expected seconds or milliseconds)",
                other
            )),
        }
    }
}

impl fmt::Display for DelayUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelayUnit::Seconds => write!(f, "seconds"),
            DelayUnit::Milliseconds => write!(f, "milliseconds"),
        }
    }
}

/// Layout of sequence files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceFormat {
    /// Whether the first row is a header that must match the column names
    pub header: bool,
    /// Column names: relay, state, delay
    pub columns: [String; 3],
    /// Unit of the delay column
    pub delay_unit: DelayUnit,
}

impl Default for SequenceFormat {
    fn default() -> Self {
        Self {
            header: true,
            columns: ["relay".into(), "state".into(), "delay".into()],
            delay_unit: DelayUnit::Seconds,
        }
    }
}

/// One relay operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceStep {
    /// Source line number in the file (1-based)
    pub row: u64,
    /// Target relay
    pub relay: RelayId,
    /// Desired state
    pub state: RelayState,
    /// Wait before executing the step
    pub delay: Option<Duration>,
}

/// Parsed, validated sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    source: String,
    steps: Vec<SequenceStep>,
    row_count: u64,
}

impl Sequence {
    /// Create a sequence from already validated steps
    pub fn new(source: impl Into<String>, steps: Vec<SequenceStep>) -> Self {
        let row_count = steps.len() as u64;
        Self {
            source: source.into(),
            steps,
            row_count,
        }
    }

    /// Where the sequence came from (file path or caller supplied name)
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Steps in execution order
    pub fn steps(&self) -> &[SequenceStep] {
        &self.steps
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether there is nothing to run
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of data rows in the source, excluding header and comments
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Sum of all step delays
    pub fn total_delay(&self) -> Duration {
        self.steps.iter().filter_map(|step| step.delay).sum()
    }
}

impl IntoIterator for Sequence {
    type Item = SequenceStep;
    type IntoIter = std::vec::IntoIter<SequenceStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.into_iter()
    }
}

/// What is wrong with one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowErrorKind {
    /// Relay is neither an identifier nor a label in the map
    UnknownRelay(String),
    /// State column is not a recognised state
    InvalidState(String),
    /// Delay column is not a non-negative number
    InvalidDelay(String),
    /// Row has too few or too many fields
    FieldCount {
        /// Fields found
        found: usize,
    },
    /// A required field is empty
    MissingField(&'static str),
}

impl fmt::Display for RowErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowErrorKind::UnknownRelay(relay) => write!(f, "unknown relay '{}'", relay),
            RowErrorKind::InvalidState(state) => write!(
                f,
                "invalid state '{}' (expected on/off, 1/0 or true/false)",
                state
            ),
            RowErrorKind::InvalidDelay(delay) => write!(f, "invalid delay '{}'", delay),
            RowErrorKind::FieldCount { found } => {
                write!(f, "expected 2 or 3 fields, found {}", found)
            }
            RowErrorKind::MissingField(field) => write!(f, "missing {}", field),
        }
    }
}

/// One malformed row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// Source line number (1-based)
    pub row: u64,
    /// Problem found
    pub kind: RowErrorKind,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row, self.kind)
    }
}

/// Sequence loading error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    /// The file as a whole is unusable (bad header, not UTF-8)
    #[error("invalid sequence file: {0}")]
    Schema(String),

    /// One or more rows are malformed
    #[error("{} malformed row(s): {}", .0.len(), join_rows(.0))]
    Rows(Vec<RowError>),

    /// The file could not be read
    #[error("failed to read sequence: {0}")]
    Io(String),
}

fn join_rows(rows: &[RowError]) -> String {
    rows.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_units() {
        assert_eq!(
            DelayUnit::Seconds.to_duration(0.5),
            Some(Duration::from_millis(500))
        );
        assert_eq!(
            DelayUnit::Milliseconds.to_duration(250.0),
            Some(Duration::from_millis(250))
        );
        assert_eq!(DelayUnit::Seconds.to_duration(-1.0), None);
        assert_eq!(DelayUnit::Seconds.to_duration(f64::NAN), None);
        assert_eq!(DelayUnit::Seconds.to_duration(1e19), None);
        assert_eq!(DelayUnit::Seconds.to_duration(86_400.0), Some(MAX_STEP_DELAY));
        assert_eq!(DelayUnit::Milliseconds.to_duration(86_400_001.0), None);
        assert_eq!("ms".parse::<DelayUnit>().unwrap(), DelayUnit::Milliseconds);
        assert!("minutes".parse::<DelayUnit>().is_err());
    }

    #[test]
    fn test_rows_error_lists_every_row() {
        let err = SequenceError::Rows(vec![
            RowError {
                row: 3,
                kind: RowErrorKind::UnknownRelay("Z".into()),
            },
            RowError {
                row: 7,
                kind: RowErrorKind::FieldCount { found: 5 },
            },
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 malformed row(s)"));
        assert!(msg.contains("row 3: unknown relay 'Z'"));
        assert!(msg.contains("row 7: expected 2 or 3 fields, found 5"));
    }

    #[test]
    fn test_total_delay() {
        let seq = Sequence::new(
            "inline",
            vec![
                SequenceStep {
                    row: 1,
                    relay: "A".into(),
                    state: RelayState::On,
                    delay: Some(Duration::from_millis(100)),
                },
                SequenceStep {
                    row: 2,
                    relay: "A".into(),
                    state: RelayState::Off,
                    delay: None,
                },
            ],
        );
        assert_eq!(seq.total_delay(), Duration::from_millis(100));
        assert_eq!(seq.row_count(), 2);
    }
}
