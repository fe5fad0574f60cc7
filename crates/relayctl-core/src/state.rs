//! Relay state store
//!
//! Authoritative in-memory record of what was asked of each relay and what
//! the adapter actually acknowledged. Only the executor writes (the mutators
//! are crate-private); any number of readers may take snapshots. Each record
//! is replaced under a write lock, so a reader never sees a record with the
//! `commanded` half of an update but not the `confirmed` half.

use std::collections::HashMap;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::map::{RelayId, RelayMap, RelayState};

/// State record for one relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayStatus {
    /// Last state requested by a caller
    pub commanded: Option<RelayState>,
    /// Last state the adapter acknowledged (or verified by read-back)
    pub confirmed: Option<RelayState>,
    /// When `confirmed` last changed
    pub last_change: Option<SystemTime>,
}

impl RelayStatus {
    /// Whether the last request has been reached
    pub fn is_settled(&self) -> bool {
        self.commanded.is_none() || self.commanded == self.confirmed
    }
}

/// Per-relay state records, keyed by the relay map
#[derive(Debug)]
pub struct StateStore {
    ids: Vec<RelayId>,
    index: HashMap<RelayId, usize>,
    records: RwLock<Vec<RelayStatus>>,
}

impl StateStore {
    /// Create an empty store covering every relay in `map`
    pub fn new(map: &RelayMap) -> Self {
        let ids: Vec<RelayId> = map.iter().map(|relay| relay.id.clone()).collect();
        let index = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        let records = RwLock::new(vec![RelayStatus::default(); ids.len()]);
        Self {
            ids,
            index,
            records,
        }
    }

    fn slot(&self, id: &RelayId) -> Result<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| Error::UnknownRelay(id.clone()))
    }

    /// Current record for one relay
    pub fn get(&self, id: &RelayId) -> Result<RelayStatus> {
        let slot = self.slot(id)?;
        Ok(self.records.read()[slot])
    }

    /// Copy of every record in relay map order
    pub fn snapshot(&self) -> Vec<(RelayId, RelayStatus)> {
        let records = self.records.read();
        self.ids.iter().cloned().zip(records.iter().copied()).collect()
    }

    /// Relays whose confirmed state is `On`
    pub fn confirmed_on(&self) -> Vec<RelayId> {
        let records = self.records.read();
        self.ids
            .iter()
            .zip(records.iter())
            .filter(|(_, status)| status.confirmed == Some(RelayState::On))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub(crate) fn set_commanded(&self, id: &RelayId, state: RelayState) -> Result<()> {
        let slot = self.slot(id)?;
        self.records.write()[slot].commanded = Some(state);
        Ok(())
    }

    pub(crate) fn set_confirmed(
        &self,
        id: &RelayId,
        state: RelayState,
        timestamp: SystemTime,
    ) -> Result<()> {
        let slot = self.slot(id)?;
        let mut records = self.records.write();
        let record = &mut records[slot];
        if record.confirmed != Some(state) || record.last_change.is_none() {
            record.last_change = Some(timestamp);
        }
        record.confirmed = Some(state);
        Ok(())
    }

    /// Record a state reached by every relay at once (after a reset)
    ///
    /// `commanded` follows only for relays that had no pending request.
    pub(crate) fn confirm_all(&self, state: RelayState, timestamp: SystemTime) {
        let mut records = self.records.write();
        for record in records.iter_mut() {
            if record.confirmed != Some(state) {
                record.last_change = Some(timestamp);
            }
            record.confirmed = Some(state);
            if record.commanded.is_none() {
                record.commanded = Some(state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{LogicalRelay, Polarity};

    fn store() -> StateStore {
        let map = RelayMap::new(
            vec![LogicalRelay::new("A", 0), LogicalRelay::new("B", 1)],
            Polarity::ActiveLow,
        )
        .unwrap();
        StateStore::new(&map)
    }

    #[test]
    fn test_initially_unknown() {
        let store = store();
        let status = store.get(&"A".into()).unwrap();
        assert_eq!(status, RelayStatus::default());
        assert!(status.is_settled());
        assert!(store.get(&"Z".into()).is_err());
    }

    #[test]
    fn test_commanded_does_not_touch_confirmed() {
        let store = store();
        store.set_commanded(&"A".into(), RelayState::On).unwrap();
        let status = store.get(&"A".into()).unwrap();
        assert_eq!(status.commanded, Some(RelayState::On));
        assert_eq!(status.confirmed, None);
        assert!(!status.is_settled());
    }

    #[test]
    fn test_confirmed_sets_timestamp_on_change_only() {
        let store = store();
        let t0 = SystemTime::UNIX_EPOCH;
        let t1 = t0 + std::time::Duration::from_secs(5);
        store.set_confirmed(&"B".into(), RelayState::On, t0).unwrap();
        store.set_confirmed(&"B".into(), RelayState::On, t1).unwrap();
        assert_eq!(store.get(&"B".into()).unwrap().last_change, Some(t0));
        store.set_confirmed(&"B".into(), RelayState::Off, t1).unwrap();
        assert_eq!(store.get(&"B".into()).unwrap().last_change, Some(t1));
    }

    #[test]
    fn test_snapshot_order_and_confirm_all() {
        let store = store();
        store.set_commanded(&"B".into(), RelayState::On).unwrap();
        store.confirm_all(RelayState::Off, SystemTime::now());

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].0, RelayId::from("A"));
        assert_eq!(snapshot[0].1.commanded, Some(RelayState::Off));
        assert_eq!(snapshot[1].1.commanded, Some(RelayState::On));
        assert_eq!(snapshot[1].1.confirmed, Some(RelayState::Off));
        assert!(store.confirmed_on().is_empty());
    }
}
