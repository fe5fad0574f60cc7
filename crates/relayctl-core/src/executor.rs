//! Command executor
//!
//! The executor is the only writer of the [`StateStore`] and the only user of
//! the adapter handle. A command goes through these steps:
//!
//! 1. resolve the relay through the [`RelayMap`] (unknown relays fail before
//!    any I/O),
//! 2. record the commanded state,
//! 3. drive the line, re-acquiring the adapter if the previous handle failed,
//! 4. record the confirmed state only once the adapter acknowledged it.
//!
//! Transient failures are retried up to [`RetryPolicy::attempts`] times. When
//! every attempt fails the confirmed state keeps its pre-call value and the
//! caller gets [`Error::DeviceUnavailable`].
//!
//! Several relays can be switched as one transaction with
//! [`execute_many`](CommandExecutor::execute_many): the adapter sees a single
//! write, and either every relay in the set is confirmed or none is.
//!
//! Commands are serialized against the single physical connection. A command
//! submitted while another is in flight is rejected with [`Error::Busy`]
//! rather than queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::device::{DeviceConnector, DeviceIdentity, Level, LineAddress, RelayDevice};
use crate::error::{Error, Result};
use crate::events::{Event, EventSink};
use crate::map::{RelayId, RelayMap, RelayState};
use crate::state::{RelayStatus, StateStore};

/// Default number of attempts per command
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Default backoff unit between attempts
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(50);

/// Default pause between relays in [`CommandExecutor::pulse_all`]
pub const DEFAULT_SWEEP_GAP: Duration = Duration::from_millis(200);

/// Bounded retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per command, including the first (at least 1)
    pub attempts: u32,
    /// Backoff unit; the wait before attempt `n` is `(n - 1) * backoff`
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Create a policy, clamping `attempts` to at least one
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Single attempt, no retry
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Wait before the given (1-based) attempt
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff * attempt.saturating_sub(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, DEFAULT_BACKOFF)
    }
}

/// Executor behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Retry policy for transient failures
    pub retry: RetryPolicy,
    /// Read lines back after writing when the adapter supports it
    pub verify_writes: bool,
    /// Drive every relay off before releasing the adapter
    pub release_on_shutdown: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            verify_writes: true,
            release_on_shutdown: true,
        }
    }
}

/// Result of a successful command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Relay that was commanded
    pub relay: RelayId,
    /// Line that was driven
    pub line: LineAddress,
    /// State record after the command
    pub status: RelayStatus,
    /// Attempts beyond the first
    pub retries: u32,
}

struct Link {
    connector: Box<dyn DeviceConnector>,
    handle: Option<Box<dyn RelayDevice>>,
    /// A handle was discarded and has not been re-acquired yet
    lost: bool,
    /// Relays confirmed on whose re-drive after a reset did not go through
    pending_restore: Vec<RelayId>,
    closed: bool,
}

/// Serialized executor of relay commands against one adapter
pub struct CommandExecutor {
    identity: DeviceIdentity,
    map: Arc<RelayMap>,
    store: Arc<StateStore>,
    options: ExecutorOptions,
    sink: Arc<dyn EventSink>,
    connected: AtomicBool,
    link: Mutex<Link>,
}

impl CommandExecutor {
    /// Create an executor
    ///
    /// Nothing is acquired yet; call [`connect`](Self::connect) or let the
    /// first command do it. Fails with [`Error::InvalidMapping`] when the map
    /// references lines the backend does not have.
    pub fn new(
        connector: Box<dyn DeviceConnector>,
        identity: DeviceIdentity,
        map: Arc<RelayMap>,
        options: ExecutorOptions,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        map.check_line_count(connector.line_count())?;
        let store = Arc::new(StateStore::new(&map));
        log::debug!(
            "Executor for {} relays on {} backend ({} attempts, {:?} backoff)",
            map.len(),
            connector.name(),
            options.retry.attempts,
            options.retry.backoff
        );
        Ok(Self {
            identity,
            map,
            store,
            options,
            sink,
            connected: AtomicBool::new(false),
            link: Mutex::new(Link {
                connector,
                handle: None,
                lost: false,
                pending_restore: Vec::new(),
                closed: false,
            }),
        })
    }

    /// Adapter identity this executor acquires
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Relay map
    pub fn map(&self) -> &Arc<RelayMap> {
        &self.map
    }

    /// Shared read access to the state store
    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    /// Executor options
    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Whether an adapter handle is currently held
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// State record of one relay
    pub fn status(&self, id: &RelayId) -> Result<RelayStatus> {
        self.store.get(id)
    }

    /// Copy of every state record in map order
    pub fn snapshot(&self) -> Vec<(RelayId, RelayStatus)> {
        self.store.snapshot()
    }

    pub(crate) fn emit(&self, event: Event) {
        self.sink.emit(event);
    }

    /// Acquire and reset the adapter
    ///
    /// A failure here is not fatal: the executor stays usable in degraded
    /// mode and every command retries the acquisition.
    pub fn connect(&self) -> Result<()> {
        let mut link = self.link.lock();
        if link.closed {
            return Err(Error::Closed);
        }
        if link.handle.is_some() {
            return Ok(());
        }
        self.open_link(&mut link)
    }

    /// Drive one relay into `desired`
    pub fn execute(&self, id: &RelayId, desired: RelayState) -> Result<CommandOutcome> {
        self.transact(std::slice::from_ref(id), desired)?
            .pop()
            .ok_or_else(|| Error::UnknownRelay(id.clone()))
    }

    /// Drive several relays into `desired` with one adapter write
    ///
    /// Repeated identifiers are switched once. Outcomes come back in request
    /// order. On failure no relay of the set is confirmed and the error names
    /// the first one.
    pub fn execute_many(&self, ids: &[RelayId], desired: RelayState) -> Result<Vec<CommandOutcome>> {
        let mut unique: Vec<RelayId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(id) {
                unique.push(id.clone());
            }
        }
        self.transact(&unique, desired)
    }

    fn transact(&self, ids: &[RelayId], desired: RelayState) -> Result<Vec<CommandOutcome>> {
        let Some(first) = ids.first() else {
            return Ok(Vec::new());
        };
        let lines = ids
            .iter()
            .map(|id| self.map.resolve(id))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| self.rejected(ids, desired, e))?;
        let mut link = self
            .link
            .try_lock()
            .ok_or_else(|| self.rejected(ids, desired, Error::Busy))?;
        if link.closed {
            return Err(self.rejected(ids, desired, Error::Closed));
        }

        for id in ids {
            self.store.set_commanded(id, desired)?;
        }
        // A fresh command supersedes any restore still owed to these relays
        link.pending_restore.retain(|pending| !ids.contains(pending));

        let level = self.map.level_for(desired);
        let writes: Vec<(LineAddress, Level)> = lines.iter().map(|&line| (line, level)).collect();
        let max_attempts = self.options.retry.attempts;

        let mut attempts = 0;
        let last_error = loop {
            attempts += 1;
            match self.attempt(&mut link, &writes) {
                Ok(()) => {
                    let now = SystemTime::now();
                    let retries = attempts - 1;
                    let mut outcomes = Vec::with_capacity(ids.len());
                    for (id, &line) in ids.iter().zip(&lines) {
                        self.store.set_confirmed(id, desired, now)?;
                        self.emit(Event::CommandSucceeded {
                            relay: id.clone(),
                            state: desired,
                            retries,
                        });
                        outcomes.push(CommandOutcome {
                            relay: id.clone(),
                            line,
                            status: self.store.get(id)?,
                            retries,
                        });
                    }
                    return Ok(outcomes);
                }
                Err(e) if e.is_transient() && attempts < max_attempts => {
                    log::warn!(
                        "Relay {} -> {}: attempt {}/{} failed: {}",
                        describe(ids),
                        desired,
                        attempts,
                        max_attempts,
                        e
                    );
                    thread::sleep(self.options.retry.delay_before(attempts + 1));
                }
                Err(e) => break e,
            }
        };

        for id in ids {
            self.emit(Event::CommandFailed {
                relay: id.clone(),
                state: desired,
                attempts,
                error: last_error.to_string(),
            });
        }
        Err(Error::DeviceUnavailable {
            relay: first.clone(),
            attempts,
            last_error: Box::new(last_error),
        })
    }

    /// Report a command refused before any attempt was made
    fn rejected(&self, ids: &[RelayId], desired: RelayState, error: Error) -> Error {
        for id in ids {
            self.emit(Event::CommandFailed {
                relay: id.clone(),
                state: desired,
                attempts: 0,
                error: error.to_string(),
            });
        }
        error
    }

    /// Press a relay: on, hold for `duration`, off
    pub fn pulse(&self, id: &RelayId, duration: Duration) -> Result<CommandOutcome> {
        self.execute(id, RelayState::On)?;
        thread::sleep(duration);
        self.execute(id, RelayState::Off)
    }

    /// Press several relays together: all on, hold for `duration`, all off
    pub fn press(&self, ids: &[RelayId], duration: Duration) -> Result<Vec<CommandOutcome>> {
        self.execute_many(ids, RelayState::On)?;
        thread::sleep(duration);
        self.execute_many(ids, RelayState::Off)
    }

    /// Pulse every relay in map order, pausing `gap` between relays
    ///
    /// A failing relay does not stop the sweep.
    pub fn pulse_all(
        &self,
        duration: Duration,
        gap: Duration,
    ) -> Vec<(RelayId, Result<CommandOutcome>)> {
        let mut results = Vec::with_capacity(self.map.len());
        for (index, relay) in self.map.iter().enumerate() {
            if index > 0 {
                thread::sleep(gap);
            }
            results.push((relay.id.clone(), self.pulse(&relay.id, duration)));
        }
        results
    }

    /// Command every relay off, in map order
    pub fn all_off(&self) -> Vec<(RelayId, Result<CommandOutcome>)> {
        self.map
            .iter()
            .map(|relay| {
                let result = self.execute(&relay.id, RelayState::Off);
                (relay.id.clone(), result)
            })
            .collect()
    }

    /// Release the adapter
    ///
    /// Waits for an in-flight command, optionally drives every relay off,
    /// then closes the handle. Only the first call does anything.
    pub fn shutdown(&self) {
        let mut link = self.link.lock();
        if link.closed {
            return;
        }
        link.closed = true;

        if let Some(mut handle) = link.handle.take() {
            if self.options.release_on_shutdown {
                self.release_all(handle.as_mut());
            }
            handle.close();
            self.emit(Event::Closed);
        }
        self.connected.store(false, Ordering::Release);
    }

    fn release_all(&self, handle: &mut dyn RelayDevice) {
        let level = self.map.idle_level();
        for relay in self.map.iter() {
            if let Err(e) = handle.write_line(relay.line, level) {
                log::warn!("Failed to release relay {}: {}", relay.id, e);
                return;
            }
            self.record(&relay.id, RelayState::Off);
        }
        log::info!("All relays released");
    }

    fn record(&self, id: &RelayId, state: RelayState) {
        let result = self
            .store
            .set_commanded(id, state)
            .and_then(|()| self.store.set_confirmed(id, state, SystemTime::now()));
        if let Err(e) = result {
            log::error!("State store rejected update for {}: {}", id, e);
        }
    }

    fn attempt(&self, link: &mut Link, writes: &[(LineAddress, Level)]) -> Result<()> {
        if link.handle.is_none() {
            self.open_link(link)?;
        }
        let handle = link.handle.as_mut().ok_or_else(Error::handle_closed)?;
        let result = drive(handle.as_mut(), writes, self.options.verify_writes);
        if let Err(e @ Error::Io { .. }) = &result {
            self.discard(link, e);
        }
        result
    }

    /// Acquire, reset, then re-drive relays that were confirmed on
    fn open_link(&self, link: &mut Link) -> Result<()> {
        let mut handle = match link.connector.acquire(&self.identity) {
            Ok(handle) => handle,
            Err(e) => {
                self.emit(Event::AcquireFailed {
                    identity: self.identity.clone(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        };
        self.emit(Event::Acquired {
            identity: self.identity.clone(),
        });

        if let Err(e) = handle.reset() {
            handle.close();
            self.emit(Event::AcquireFailed {
                identity: self.identity.clone(),
                error: e.to_string(),
            });
            return Err(e);
        }
        self.emit(Event::Reset {
            identity: self.identity.clone(),
        });

        // Reset drove every line idle; that is now the confirmed state
        let mut restore = self.store.confirmed_on();
        for id in link.pending_restore.drain(..) {
            if !restore.contains(&id) {
                restore.push(id);
            }
        }
        self.store.confirm_all(RelayState::Off, SystemTime::now());

        if !restore.is_empty() {
            let level = self.map.level_for(RelayState::On);
            let writes = restore
                .iter()
                .map(|id| self.map.resolve(id).map(|line| (line, level)))
                .collect::<Result<Vec<_>>>()?;
            if let Err(e) = handle.write_lines(&writes) {
                handle.close();
                log::warn!(
                    "Could not restore {} after reset: {}",
                    describe(&restore),
                    e
                );
                link.pending_restore = restore;
                self.mark_lost(link, &e);
                return Err(e);
            }
            let now = SystemTime::now();
            for id in &restore {
                self.store.set_confirmed(id, RelayState::On, now)?;
            }
            log::info!("Restored {} relay(s) after reset", restore.len());
        }

        link.handle = Some(handle);
        self.connected.store(true, Ordering::Release);
        if link.lost {
            link.lost = false;
            self.emit(Event::DeviceRecovered {
                identity: self.identity.clone(),
            });
        }
        Ok(())
    }

    fn discard(&self, link: &mut Link, cause: &Error) {
        if let Some(mut handle) = link.handle.take() {
            handle.close();
        }
        self.mark_lost(link, cause);
    }

    fn mark_lost(&self, link: &mut Link, cause: &Error) {
        link.lost = true;
        self.connected.store(false, Ordering::Release);
        self.emit(Event::DeviceLost {
            reason: cause.to_string(),
            disconnected: cause.is_disconnect(),
        });
    }
}

impl Drop for CommandExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn drive(device: &mut dyn RelayDevice, writes: &[(LineAddress, Level)], verify: bool) -> Result<()> {
    match writes {
        [(line, level)] => device.write_line(*line, *level)?,
        _ => device.write_lines(writes)?,
    }
    if verify && device.supports_readback() {
        for &(line, level) in writes {
            let found = device.read_line(line)?;
            if found != level {
                return Err(Error::ReadbackMismatch {
                    line,
                    expected: level,
                    found,
                });
            }
        }
    }
    Ok(())
}

/// `A` or `A+B+C` for log lines
fn describe(ids: &[RelayId]) -> String {
    ids.iter()
        .map(RelayId::as_str)
        .collect::<Vec<_>>()
        .join("+")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;
    use crate::map::{LogicalRelay, Polarity};
    use crate::testing::{FakeBank, WriteFault};

    fn ab_map() -> Arc<RelayMap> {
        Arc::new(
            RelayMap::new(
                vec![LogicalRelay::new("A", 0), LogicalRelay::new("B", 1)],
                Polarity::ActiveLow,
            )
            .unwrap(),
        )
    }

    fn options(attempts: u32) -> ExecutorOptions {
        ExecutorOptions {
            retry: RetryPolicy::new(attempts, Duration::from_millis(1)),
            ..ExecutorOptions::default()
        }
    }

    fn executor(bank: &FakeBank, attempts: u32) -> (CommandExecutor, Arc<EventLog>) {
        let events = Arc::new(EventLog::new());
        let exec = CommandExecutor::new(
            Box::new(bank.connector()),
            DeviceIdentity::ft232h(),
            ab_map(),
            options(attempts),
            events.clone(),
        )
        .unwrap();
        (exec, events)
    }

    fn failures(events: &EventLog) -> Vec<(RelayId, u32)> {
        events
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::CommandFailed {
                    relay, attempts, ..
                } => Some((relay, attempts)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_unknown_relay_does_no_io() {
        let bank = FakeBank::new();
        let (exec, events) = executor(&bank, 3);
        let err = exec.execute(&"Z".into(), RelayState::On).unwrap_err();
        assert_eq!(err, Error::UnknownRelay("Z".into()));
        assert_eq!(bank.stats().acquisitions, 0);
        assert_eq!(bank.stats().writes, 0);
        assert_eq!(failures(&events), vec![(RelayId::from("Z"), 0)]);
    }

    #[test]
    fn test_connect_resets_to_idle() {
        let bank = FakeBank::new();
        let (exec, events) = executor(&bank, 3);
        exec.connect().unwrap();
        assert!(exec.is_connected());
        assert_eq!(bank.stats().resets, 1);
        assert_eq!(bank.level(0), Level::High);
        let status = exec.status(&"A".into()).unwrap();
        assert_eq!(status.confirmed, Some(RelayState::Off));
        assert_eq!(
            events.events()[..2],
            [
                Event::Acquired {
                    identity: DeviceIdentity::ft232h()
                },
                Event::Reset {
                    identity: DeviceIdentity::ft232h()
                },
            ]
        );
    }

    #[test]
    fn test_execute_drives_active_low_line() {
        let bank = FakeBank::new();
        let (exec, _) = executor(&bank, 3);
        let outcome = exec.execute(&"B".into(), RelayState::On).unwrap();
        assert_eq!(outcome.line, 1);
        assert_eq!(outcome.retries, 0);
        assert_eq!(outcome.status.commanded, Some(RelayState::On));
        assert_eq!(outcome.status.confirmed, Some(RelayState::On));
        assert_eq!(bank.level(1), Level::Low);
    }

    #[test]
    fn test_transient_failures_then_success() {
        let bank = FakeBank::new();
        let (exec, _) = executor(&bank, 3);
        exec.connect().unwrap();
        let before_b = exec.status(&"B".into()).unwrap();

        bank.fail_writes([WriteFault::Io, WriteFault::Io]);
        let gate = bank.gate_next_write();
        let exec = Arc::new(exec);
        let worker = {
            let exec = Arc::clone(&exec);
            thread::spawn(move || exec.execute(&"A".into(), RelayState::On))
        };

        // First attempt is parked inside the adapter write
        gate.wait();
        let during_a = exec.status(&"A".into()).unwrap();
        assert_eq!(during_a.commanded, Some(RelayState::On));
        assert_eq!(during_a.confirmed, Some(RelayState::Off));
        assert_eq!(exec.status(&"B".into()).unwrap(), before_b);
        gate.wait();

        let outcome = worker.join().unwrap().unwrap();
        assert_eq!(outcome.retries, 2);
        assert_eq!(outcome.status.confirmed, Some(RelayState::On));
        assert_eq!(outcome.status.commanded, Some(RelayState::On));
        assert_eq!(exec.status(&"B".into()).unwrap(), before_b);
    }

    #[test]
    fn test_exhausted_retries_keep_confirmed() {
        let bank = FakeBank::new();
        let (exec, events) = executor(&bank, 3);
        exec.execute(&"A".into(), RelayState::On).unwrap();

        bank.fail_writes([WriteFault::Io, WriteFault::Io, WriteFault::Io]);
        let err = exec.execute(&"A".into(), RelayState::Off).unwrap_err();
        match err {
            Error::DeviceUnavailable {
                relay,
                attempts,
                last_error,
            } => {
                assert_eq!(relay, RelayId::from("A"));
                assert_eq!(attempts, 3);
                assert!(last_error.is_transient());
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let status = exec.status(&"A".into()).unwrap();
        assert_eq!(status.confirmed, Some(RelayState::On));
        assert_eq!(status.commanded, Some(RelayState::Off));
        assert!(events
            .events()
            .iter()
            .any(|e| matches!(e, Event::CommandFailed { attempts: 3, .. })));
    }

    #[test]
    fn test_disconnect_then_recover() {
        let bank = FakeBank::new();
        let (exec, events) = executor(&bank, 3);
        exec.connect().unwrap();
        events.take();

        bank.fail_writes([WriteFault::Disconnect]);
        let outcome = exec.execute(&"A".into(), RelayState::On).unwrap();
        assert_eq!(outcome.retries, 1);
        assert_eq!(bank.stats().acquisitions, 2);

        let events = events.events();
        let lost = events
            .iter()
            .position(|e| {
                matches!(
                    e,
                    Event::DeviceLost {
                        disconnected: true,
                        ..
                    }
                )
            })
            .unwrap();
        let recovered = events
            .iter()
            .position(|e| matches!(e, Event::DeviceRecovered { .. }))
            .unwrap();
        assert!(lost < recovered);

        // Normal operation afterwards
        let outcome = exec.execute(&"B".into(), RelayState::On).unwrap();
        assert_eq!(outcome.retries, 0);
    }

    #[test]
    fn test_recovery_restores_confirmed_on_relays() {
        let bank = FakeBank::new();
        let (exec, _) = executor(&bank, 3);
        exec.execute(&"A".into(), RelayState::On).unwrap();

        bank.fail_writes([WriteFault::Disconnect]);
        exec.execute(&"B".into(), RelayState::On).unwrap();

        assert_eq!(bank.level(0), Level::Low);
        assert_eq!(bank.level(1), Level::Low);
        assert_eq!(
            exec.status(&"A".into()).unwrap().confirmed,
            Some(RelayState::On)
        );
    }

    #[test]
    fn test_transfer_error_is_not_reported_as_disconnect() {
        let bank = FakeBank::new();
        let (exec, events) = executor(&bank, 3);
        exec.connect().unwrap();
        events.take();

        bank.fail_writes([WriteFault::Io]);
        exec.execute(&"A".into(), RelayState::On).unwrap();
        assert!(events.events().iter().any(|e| matches!(
            e,
            Event::DeviceLost {
                disconnected: false,
                ..
            }
        )));
    }

    #[test]
    fn test_failed_restore_is_retried_on_next_acquire() {
        let bank = FakeBank::new();
        let (exec, events) = executor(&bank, 2);
        exec.execute(&"A".into(), RelayState::On).unwrap();
        events.take();

        // B's write drops the adapter, then re-driving A after the reset fails
        bank.fail_writes([WriteFault::Disconnect, WriteFault::Io]);
        let err = exec.execute(&"B".into(), RelayState::On).unwrap_err();
        assert!(matches!(err, Error::DeviceUnavailable { attempts: 2, .. }));
        assert!(!exec.is_connected());
        assert_eq!(bank.level(0), Level::High);
        let lost = events
            .events()
            .iter()
            .filter(|e| matches!(e, Event::DeviceLost { .. }))
            .count();
        assert_eq!(lost, 2);

        // A is re-driven on the next acquisition although reset marked it off
        exec.execute(&"B".into(), RelayState::On).unwrap();
        assert_eq!(bank.level(0), Level::Low);
        assert_eq!(bank.level(1), Level::Low);
        assert_eq!(
            exec.status(&"A".into()).unwrap().confirmed,
            Some(RelayState::On)
        );
        assert!(events
            .events()
            .iter()
            .any(|e| matches!(e, Event::DeviceRecovered { .. })));
    }

    #[test]
    fn test_new_command_supersedes_pending_restore() {
        let bank = FakeBank::new();
        let (exec, _) = executor(&bank, 2);
        exec.execute(&"A".into(), RelayState::On).unwrap();

        bank.fail_writes([WriteFault::Disconnect, WriteFault::Io]);
        assert!(exec.execute(&"B".into(), RelayState::On).is_err());

        exec.execute(&"A".into(), RelayState::Off).unwrap();
        assert_eq!(bank.level(0), Level::High);
        // No restore write in between the original on and the final off
        assert_eq!(bank.writes_to(0), vec![Level::Low, Level::High]);
    }

    #[test]
    fn test_absent_device_fails_fast() {
        let bank = FakeBank::new();
        bank.unplug();
        let (exec, events) = executor(&bank, 3);
        assert!(matches!(exec.connect(), Err(Error::DeviceNotFound(_))));

        let err = exec.execute(&"A".into(), RelayState::On).unwrap_err();
        match err {
            Error::DeviceUnavailable {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 1);
                assert!(matches!(*last_error, Error::DeviceNotFound(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(exec.status(&"A".into()).unwrap().confirmed, None);
        assert!(events
            .events()
            .iter()
            .any(|e| matches!(e, Event::AcquireFailed { .. })));

        bank.plug();
        assert!(exec.execute(&"A".into(), RelayState::On).is_ok());
    }

    #[test]
    fn test_readback_mismatch_is_retried() {
        let bank = FakeBank::with_readback();
        let (exec, _) = executor(&bank, 3);
        exec.connect().unwrap();
        bank.fail_writes([WriteFault::Stuck]);
        let outcome = exec.execute(&"A".into(), RelayState::On).unwrap();
        assert_eq!(outcome.retries, 1);
        assert_eq!(bank.stats().acquisitions, 1);
        assert!(bank.stats().reads >= 2);
    }

    #[test]
    fn test_concurrent_command_rejected() {
        let bank = FakeBank::new();
        let (exec, events) = executor(&bank, 3);
        exec.connect().unwrap();
        let exec = Arc::new(exec);

        let gate = bank.gate_next_write();
        let worker = {
            let exec = Arc::clone(&exec);
            thread::spawn(move || exec.execute(&"A".into(), RelayState::On))
        };
        gate.wait();
        assert_eq!(
            exec.execute(&"B".into(), RelayState::On).unwrap_err(),
            Error::Busy
        );
        gate.wait();
        assert!(worker.join().unwrap().is_ok());
        assert_eq!(failures(&events), vec![(RelayId::from("B"), 0)]);
        // The rejected command never reached the store
        assert_eq!(exec.status(&"B".into()).unwrap().commanded, Some(RelayState::Off));
    }

    #[test]
    fn test_shutdown_releases_once() {
        let bank = FakeBank::new();
        let (exec, events) = executor(&bank, 3);
        exec.execute(&"A".into(), RelayState::On).unwrap();

        exec.shutdown();
        exec.shutdown();
        assert_eq!(bank.level(0), Level::High);
        assert_eq!(bank.stats().closes, 1);
        assert_eq!(
            events
                .events()
                .iter()
                .filter(|e| **e == Event::Closed)
                .count(),
            1
        );
        assert_eq!(
            exec.execute(&"A".into(), RelayState::On).unwrap_err(),
            Error::Closed
        );
        assert!(!exec.is_connected());
        assert_eq!(failures(&events), vec![(RelayId::from("A"), 0)]);
    }

    #[test]
    fn test_map_beyond_adapter_rejected() {
        let bank = FakeBank::new();
        let map = Arc::new(
            RelayMap::new(vec![LogicalRelay::new("far", 40)], Polarity::ActiveLow).unwrap(),
        );
        let result = CommandExecutor::new(
            Box::new(bank.connector()),
            DeviceIdentity::ft232h(),
            map,
            ExecutorOptions::default(),
            Arc::new(EventLog::new()),
        );
        assert!(matches!(result, Err(Error::InvalidMapping(_))));
    }

    #[test]
    fn test_pulse_and_all_off() {
        let bank = FakeBank::new();
        let (exec, _) = executor(&bank, 3);
        let outcome = exec.pulse(&"A".into(), Duration::from_millis(1)).unwrap();
        assert_eq!(outcome.status.confirmed, Some(RelayState::Off));
        assert_eq!(bank.writes_to(0), vec![Level::Low, Level::High]);

        exec.execute(&"B".into(), RelayState::On).unwrap();
        let results = exec.all_off();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(bank.level(1), Level::High);
    }

    #[test]
    fn test_execute_many_is_one_write() {
        let bank = FakeBank::with_readback();
        let (exec, events) = executor(&bank, 3);
        exec.connect().unwrap();
        let writes_before = bank.stats().writes;

        let ids = [RelayId::from("B"), RelayId::from("A"), RelayId::from("B")];
        let outcomes = exec.execute_many(&ids, RelayState::On).unwrap();
        assert_eq!(bank.stats().writes, writes_before + 1);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].relay, RelayId::from("B"));
        assert_eq!(outcomes[1].line, 0);
        assert_eq!(bank.level(0), Level::Low);
        assert_eq!(bank.level(1), Level::Low);
        assert_eq!(
            events
                .events()
                .iter()
                .filter(|e| matches!(e, Event::CommandSucceeded { .. }))
                .count(),
            2
        );
        assert!(exec.execute_many(&[], RelayState::On).unwrap().is_empty());
    }

    #[test]
    fn test_execute_many_all_or_nothing() {
        let bank = FakeBank::new();
        let (exec, events) = executor(&bank, 2);
        exec.connect().unwrap();

        let ids = [RelayId::from("A"), RelayId::from("Z")];
        assert_eq!(
            exec.execute_many(&ids, RelayState::On).unwrap_err(),
            Error::UnknownRelay("Z".into())
        );
        assert_eq!(exec.status(&"A".into()).unwrap().commanded, Some(RelayState::Off));

        bank.fail_writes([WriteFault::Io, WriteFault::Io]);
        let ids = [RelayId::from("A"), RelayId::from("B")];
        match exec.execute_many(&ids, RelayState::On).unwrap_err() {
            Error::DeviceUnavailable {
                relay, attempts, ..
            } => {
                assert_eq!(relay, RelayId::from("A"));
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        for id in &ids {
            let status = exec.status(id).unwrap();
            assert_eq!(status.commanded, Some(RelayState::On));
            assert_eq!(status.confirmed, Some(RelayState::Off));
        }
        let failed = failures(&events);
        assert!(failed.contains(&(RelayId::from("A"), 2)));
        assert!(failed.contains(&(RelayId::from("B"), 2)));
    }

    #[test]
    fn test_press_switches_together() {
        let bank = FakeBank::new();
        let (exec, _) = executor(&bank, 3);
        exec.connect().unwrap();
        let writes_before = bank.stats().writes;

        let outcomes = exec
            .press(&[RelayId::from("A"), RelayId::from("B")], Duration::from_millis(1))
            .unwrap();
        assert_eq!(bank.stats().writes, writes_before + 2);
        assert!(outcomes
            .iter()
            .all(|o| o.status.confirmed == Some(RelayState::Off)));
        assert_eq!(bank.writes_to(0), vec![Level::Low, Level::High]);
        assert_eq!(bank.writes_to(1), vec![Level::Low, Level::High]);
    }

    #[test]
    fn test_pulse_all_sweeps_in_map_order() {
        let bank = FakeBank::new();
        let (exec, _) = executor(&bank, 1);
        exec.connect().unwrap();

        let results = exec.pulse_all(Duration::from_millis(1), Duration::from_millis(1));
        let order: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, ["A", "B"]);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(bank.writes_to(0), vec![Level::Low, Level::High]);
        assert_eq!(bank.writes_to(1), vec![Level::Low, Level::High]);

        // A failing relay is reported and the sweep carries on
        bank.fail_writes([WriteFault::Io]);
        let results = exec.pulse_all(Duration::from_millis(1), Duration::ZERO);
        assert!(matches!(
            results[0].1,
            Err(Error::DeviceUnavailable { attempts: 1, .. })
        ));
        assert!(results[1].1.is_ok());
    }
}
