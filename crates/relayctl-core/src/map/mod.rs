//! Relay map
//!
//! Static mapping between logical relay identifiers and adapter lines. The
//! map is built once from configuration and rejected outright when two
//! relays share an identifier or a line: a shared line would let one relay's
//! command silently flip another relay's reported state.
//!
//! ```ignore
//! let map = RelayMap::new(
//!     vec![LogicalRelay::new("A", 0), LogicalRelay::new("B", 1)],
//!     Polarity::ActiveLow,
//! )?;
//! assert_eq!(map.resolve(&"B".into())?, 1);
//! ```

mod types;

pub use types::*;

use std::collections::HashMap;

use crate::device::{Level, LineAddress};
use crate::error::{Error, Result};

/// Number of relays on the reference board
pub const DEFAULT_RELAY_COUNT: u8 = 10;

/// Validated relay map
#[derive(Debug, Clone)]
pub struct RelayMap {
    relays: Vec<LogicalRelay>,
    by_id: HashMap<RelayId, usize>,
    by_line: HashMap<LineAddress, usize>,
    polarity: Polarity,
}

impl RelayMap {
    /// Build a map, rejecting empty, duplicate or ambiguous entries
    pub fn new(relays: Vec<LogicalRelay>, polarity: Polarity) -> Result<Self> {
        if relays.is_empty() {
            return Err(Error::InvalidMapping("no relays configured".into()));
        }

        let mut by_id = HashMap::with_capacity(relays.len());
        let mut by_line = HashMap::with_capacity(relays.len());
        let mut problems = Vec::new();

        for (index, relay) in relays.iter().enumerate() {
            if relay.id.as_str().is_empty() {
                problems.push(format!("relay #{} has an empty identifier", index + 1));
                continue;
            }
            if let Some(&first) = by_id.get(&relay.id) {
                let first: &LogicalRelay = &relays[first];
                problems.push(format!(
                    "duplicate relay id '{}' (lines {} and {})",
                    relay.id, first.line, relay.line
                ));
            } else {
                by_id.insert(relay.id.clone(), index);
            }
            if let Some(&first) = by_line.get(&relay.line) {
                let first: &LogicalRelay = &relays[first];
                problems.push(format!(
                    "line {} assigned to both '{}' and '{}'",
                    relay.line, first.id, relay.id
                ));
            } else {
                by_line.insert(relay.line, index);
            }
        }

        problems.extend(label_conflicts(&relays));

        if !problems.is_empty() {
            return Err(Error::InvalidMapping(problems.join("; ")));
        }

        Ok(Self {
            relays,
            by_id,
            by_line,
            polarity,
        })
    }

    /// Translate a logical relay into its adapter line
    pub fn resolve(&self, id: &RelayId) -> Result<LineAddress> {
        self.get(id)
            .map(|relay| relay.line)
            .ok_or_else(|| Error::UnknownRelay(id.clone()))
    }

    /// Look up a relay by identifier
    pub fn get(&self, id: &RelayId) -> Option<&LogicalRelay> {
        self.by_id.get(id).map(|&index| &self.relays[index])
    }

    /// Position of a relay in configuration order
    pub fn index_of(&self, id: &RelayId) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    /// Reverse lookup from adapter line to relay
    pub fn relay_for_line(&self, line: LineAddress) -> Option<&LogicalRelay> {
        self.by_line.get(&line).map(|&index| &self.relays[index])
    }

    /// Find a relay by identifier, falling back to a case-insensitive label match
    pub fn lookup(&self, key: &str) -> Option<&LogicalRelay> {
        self.get(&RelayId::from(key)).or_else(|| {
            let key = key.trim();
            self.relays.iter().find(|relay| {
                relay
                    .label
                    .as_deref()
                    .is_some_and(|label| label.eq_ignore_ascii_case(key))
            })
        })
    }

    /// All relays in configuration order
    pub fn relays(&self) -> &[LogicalRelay] {
        &self.relays
    }

    /// Iterate over relays in configuration order
    pub fn iter(&self) -> impl Iterator<Item = &LogicalRelay> {
        self.relays.iter()
    }

    /// Number of relays
    pub fn len(&self) -> usize {
        self.relays.len()
    }

    /// Whether the map has no relays (never true for a validated map)
    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    /// Bank polarity
    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    /// Line level that puts a relay into `state`
    pub fn level_for(&self, state: RelayState) -> Level {
        self.polarity.level_for(state)
    }

    /// Level every line rests at after reset
    pub fn idle_level(&self) -> Level {
        self.polarity.level_for(RelayState::Off)
    }

    /// Check that every line exists on an adapter with `count` lines
    pub fn check_line_count(&self, count: u8) -> Result<()> {
        let out_of_range: Vec<String> = self
            .relays
            .iter()
            .filter(|relay| relay.line >= count)
            .map(|relay| format!("'{}' on line {}", relay.id, relay.line))
            .collect();
        if out_of_range.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidMapping(format!(
                "adapter has {} lines but {} {} beyond it",
                count,
                out_of_range.join(", "),
                if out_of_range.len() == 1 { "is" } else { "are" }
            )))
        }
    }
}

/// Labels that would make [`RelayMap::lookup`] ambiguous
///
/// Labels match case-insensitively, so two labels differing only in case
/// collide, as does a label naming some other relay's identifier. A label
/// equal to its own relay's identifier is harmless.
fn label_conflicts(relays: &[LogicalRelay]) -> Vec<String> {
    let mut problems = Vec::new();
    let mut seen: HashMap<String, &RelayId> = HashMap::new();

    for relay in relays {
        let Some(label) = relay.label.as_deref().map(str::trim) else {
            continue;
        };
        let folded = label.to_ascii_lowercase();
        if let Some(first) = seen.get(&folded) {
            problems.push(format!(
                "label '{}' used by both '{}' and '{}'",
                label, first, relay.id
            ));
        } else {
            seen.insert(folded, &relay.id);
        }
        if let Some(other) = relays
            .iter()
            .find(|other| other.id != relay.id && other.id.as_str().eq_ignore_ascii_case(label))
        {
            problems.push(format!(
                "label '{}' of '{}' names relay '{}'",
                label, relay.id, other.id
            ));
        }
    }
    problems
}

/// Reference wiring: relays `0`..`9` on lines 0..9, labelled `R0`..`R9`
pub fn reference_relays() -> Vec<LogicalRelay> {
    (0..DEFAULT_RELAY_COUNT)
        .map(|i| LogicalRelay::new(RelayId::from(i as u32), i).with_label(format!("R{}", i)))
        .collect()
}

impl Default for RelayMap {
    /// [`reference_relays`], active-low
    fn default() -> Self {
        let relays = reference_relays();
        let by_id = relays
            .iter()
            .enumerate()
            .map(|(index, relay)| (relay.id.clone(), index))
            .collect();
        let by_line = relays
            .iter()
            .enumerate()
            .map(|(index, relay)| (relay.line, index))
            .collect();
        Self {
            relays,
            by_id,
            by_line,
            polarity: Polarity::ActiveLow,
        }
    }
}
