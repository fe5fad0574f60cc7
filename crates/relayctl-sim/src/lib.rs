//! relayctl-sim - In-memory relay bank for testing
//!
//! This crate provides a simulated FT232H-class adapter that keeps its line
//! levels in memory. It backs the simulation mode used when no adapter is
//! attached, and lets tests script the failures real hardware produces:
//! transfer errors, unplugging, a handle held by another process, and lines
//! that do not follow a write.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use relayctl_core::device::{
    DeviceConnector, DeviceIdentity, Level, LineAddress, RelayDevice, FT232H_PID, FTDI_VID,
};
use relayctl_core::error::{Error, Result};

/// Configuration for the simulated bank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Number of lines
    pub lines: u8,
    /// Whether handles support read-back
    pub readback: bool,
    /// Level every line takes on reset
    pub idle_level: Level,
    /// USB identity the simulated adapter reports
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
    /// Serial number
    pub serial: Option<String>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            lines: 16,
            readback: true,
            idle_level: Level::High,
            vendor_id: FTDI_VID,
            product_id: FT232H_PID,
            serial: None,
        }
    }
}

/// Failure injected into the next write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The write fails with a transfer error
    Io,
    /// The adapter drops off the bus during the write and re-enumerates
    Disconnect,
    /// The write is acknowledged but the line keeps its old level
    Stuck,
}

/// Operation counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimStats {
    /// Successful acquisitions
    pub acquisitions: u32,
    /// Resets performed
    pub resets: u32,
    /// Write attempts, failed ones included
    pub writes: u32,
    /// Read-backs performed
    pub reads: u32,
}

#[derive(Debug)]
struct BankState {
    config: SimConfig,
    levels: Vec<Level>,
    present: bool,
    claimed: bool,
    held_elsewhere: bool,
    /// Bumped on unplug so handles from before it go stale
    generation: u64,
    faults: VecDeque<Fault>,
    stats: SimStats,
}

/// Simulated relay bank
///
/// Cloning yields another view of the same bank, so a test can keep one
/// clone to inspect and script while the executor owns the connector.
#[derive(Debug, Clone)]
pub struct SimulatedBank {
    state: Arc<Mutex<BankState>>,
}

impl SimulatedBank {
    /// Create a bank with the given configuration
    pub fn new(config: SimConfig) -> Self {
        let levels = vec![config.idle_level; config.lines as usize];
        Self {
            state: Arc::new(Mutex::new(BankState {
                config,
                levels,
                present: true,
                claimed: false,
                held_elsewhere: false,
                generation: 0,
                faults: VecDeque::new(),
                stats: SimStats::default(),
            })),
        }
    }

    /// Connector that claims this bank
    pub fn connector(&self) -> SimConnector {
        SimConnector { bank: self.clone() }
    }

    /// Level of one line
    pub fn level(&self, line: LineAddress) -> Option<Level> {
        self.state.lock().levels.get(line as usize).copied()
    }

    /// Levels of all lines
    pub fn levels(&self) -> Vec<Level> {
        self.state.lock().levels.clone()
    }

    /// Queue a failure for an upcoming write
    pub fn inject(&self, fault: Fault) {
        self.state.lock().faults.push_back(fault);
    }

    /// Number of injected faults not consumed yet
    pub fn pending_faults(&self) -> usize {
        self.state.lock().faults.len()
    }

    /// Disconnect the adapter; open handles go stale
    pub fn unplug(&self) {
        let mut state = self.state.lock();
        state.present = false;
        state.claimed = false;
        state.generation += 1;
        log::debug!("Simulated adapter unplugged");
    }

    /// Reconnect the adapter
    pub fn plug(&self) {
        self.state.lock().present = true;
        log::debug!("Simulated adapter plugged in");
    }

    /// Pretend another process holds the adapter
    pub fn hold_elsewhere(&self, held: bool) {
        self.state.lock().held_elsewhere = held;
    }

    /// Whether a handle currently claims the adapter
    pub fn is_claimed(&self) -> bool {
        self.state.lock().claimed
    }

    /// Operation counters
    pub fn stats(&self) -> SimStats {
        self.state.lock().stats
    }
}

impl Default for SimulatedBank {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

/// Connector for a [`SimulatedBank`]
#[derive(Debug, Clone)]
pub struct SimConnector {
    bank: SimulatedBank,
}

impl SimConnector {
    /// The bank this connector claims
    pub fn bank(&self) -> &SimulatedBank {
        &self.bank
    }
}

impl DeviceConnector for SimConnector {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn line_count(&self) -> u8 {
        self.bank.state.lock().config.lines
    }

    fn acquire(&mut self, identity: &DeviceIdentity) -> Result<Box<dyn RelayDevice>> {
        let mut state = self.bank.state.lock();
        let config = &state.config;
        if !state.present
            || !identity.matches(config.vendor_id, config.product_id, config.serial.as_deref())
        {
            return Err(Error::DeviceNotFound(identity.clone()));
        }
        if state.claimed || state.held_elsewhere {
            return Err(Error::DeviceBusy(identity.clone()));
        }

        state.claimed = true;
        state.stats.acquisitions += 1;
        log::debug!("Simulated adapter {} claimed", identity);

        Ok(Box::new(SimHandle {
            bank: self.bank.clone(),
            generation: state.generation,
            open: true,
            failed: false,
            last_reset: None,
        }))
    }
}

/// Open handle on a [`SimulatedBank`]
pub struct SimHandle {
    bank: SimulatedBank,
    generation: u64,
    open: bool,
    failed: bool,
    last_reset: Option<Instant>,
}

impl SimHandle {
    /// Lock the bank, failing if this handle can no longer be used
    fn usable(&mut self) -> Result<parking_lot::MutexGuard<'_, BankState>> {
        if !self.open || self.failed {
            return Err(Error::handle_closed());
        }
        let state = self.bank.state.lock();
        if !state.present || state.generation != self.generation {
            self.failed = true;
            return Err(Error::disconnected("simulated adapter is gone"));
        }
        Ok(state)
    }

    /// One write transfer updating every line in `lines`
    fn apply(&mut self, lines: &[(LineAddress, Level)]) -> Result<()> {
        let mut state = self.usable()?;
        let count = state.config.lines;
        if let Some(&(line, _)) = lines.iter().find(|(line, _)| *line >= count) {
            return Err(Error::InvalidLine { line, count });
        }
        state.stats.writes += 1;

        match state.faults.pop_front() {
            Some(Fault::Io) => {
                drop(state);
                self.failed = true;
                Err(Error::io("simulated transfer error"))
            }
            Some(Fault::Disconnect) => {
                state.claimed = false;
                state.generation += 1;
                drop(state);
                self.failed = true;
                Err(Error::disconnected("simulated adapter unplugged"))
            }
            Some(Fault::Stuck) => {
                log::trace!("Simulated write to {} line(s) stuck", lines.len());
                Ok(())
            }
            None => {
                for &(line, level) in lines {
                    state.levels[line as usize] = level;
                    log::trace!("Simulated line {} -> {}", line, level);
                }
                Ok(())
            }
        }
    }
}

impl RelayDevice for SimHandle {
    fn line_count(&self) -> u8 {
        self.bank.state.lock().config.lines
    }

    fn is_open(&self) -> bool {
        self.open && !self.failed
    }

    fn last_reset(&self) -> Option<Instant> {
        self.last_reset
    }

    fn reset(&mut self) -> Result<()> {
        let mut state = self.usable()?;
        let idle = state.config.idle_level;
        state.levels.iter_mut().for_each(|level| *level = idle);
        state.stats.resets += 1;
        drop(state);

        self.last_reset = Some(Instant::now());
        Ok(())
    }

    fn write_line(&mut self, line: LineAddress, level: Level) -> Result<()> {
        self.apply(&[(line, level)])
    }

    fn write_lines(&mut self, lines: &[(LineAddress, Level)]) -> Result<()> {
        self.apply(lines)
    }

    fn supports_readback(&self) -> bool {
        self.bank.state.lock().config.readback
    }

    fn read_line(&mut self, line: LineAddress) -> Result<Level> {
        let mut state = self.usable()?;
        if !state.config.readback {
            return Err(Error::ReadbackUnsupported);
        }
        let level = state
            .levels
            .get(line as usize)
            .copied()
            .ok_or(Error::InvalidLine {
                line,
                count: state.config.lines,
            })?;
        state.stats.reads += 1;
        Ok(level)
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        let mut state = self.bank.state.lock();
        if state.generation == self.generation {
            state.claimed = false;
        }
        log::debug!("Simulated adapter released");
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Parse backend options into a configuration
///
/// Supported options:
/// - `lines=<N>` - number of lines (default 16)
/// - `readback=<on|off>` - read-back support (default on)
pub fn parse_options(options: &[(&str, &str)], mut config: SimConfig) -> Result<SimConfig> {
    for (key, value) in options {
        match *key {
            "lines" => {
                config.lines = value
                    .parse()
                    .ok()
                    .filter(|&n: &u8| n > 0)
                    .ok_or_else(|| Error::Config(format!("invalid line count '{}'", value)))?;
            }
            "readback" => {
                config.readback = match value.to_ascii_lowercase().as_str() {
                    "on" | "1" | "true" | "yes" => true,
                    "off" | "0" | "false" | "no" => false,
                    _ => {
                        return Err(Error::Config(format!(
                            "invalid readback value '{}'",
                            value
                        )))
                    }
                };
            }
            _ => {
                log::warn!("Unknown dummy option: {}={}", key, value);
            }
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayctl_core::events::{Event, EventLog};
    use relayctl_core::executor::{CommandExecutor, ExecutorOptions, RetryPolicy};
    use relayctl_core::map::{RelayMap, RelayState};
    use std::time::Duration;

    #[test]
    fn test_acquire_is_exclusive() {
        let bank = SimulatedBank::default();
        let mut connector = bank.connector();
        let identity = DeviceIdentity::ft232h();

        let handle = connector.acquire(&identity).unwrap();
        assert!(bank.is_claimed());
        assert!(matches!(
            connector.acquire(&identity),
            Err(Error::DeviceBusy(_))
        ));

        drop(handle);
        assert!(!bank.is_claimed());
        assert!(connector.acquire(&identity).is_ok());
    }

    #[test]
    fn test_not_found_and_held_elsewhere() {
        let bank = SimulatedBank::default();
        let mut connector = bank.connector();

        let other = DeviceIdentity::ft232h().with_serial("NOPE");
        assert!(matches!(
            connector.acquire(&other),
            Err(Error::DeviceNotFound(_))
        ));

        bank.hold_elsewhere(true);
        assert!(matches!(
            connector.acquire(&DeviceIdentity::ft232h()),
            Err(Error::DeviceBusy(_))
        ));

        bank.hold_elsewhere(false);
        bank.unplug();
        assert!(matches!(
            connector.acquire(&DeviceIdentity::ft232h()),
            Err(Error::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_reset_write_read() {
        let bank = SimulatedBank::default();
        let mut handle = bank.connector().acquire(&DeviceIdentity::ft232h()).unwrap();
        handle.reset().unwrap();
        handle.reset().unwrap();
        assert!(handle.last_reset().is_some());
        assert_eq!(bank.stats().resets, 2);

        handle.write_line(3, Level::Low).unwrap();
        assert_eq!(handle.read_line(3).unwrap(), Level::Low);
        assert_eq!(bank.level(3), Some(Level::Low));
        assert_eq!(bank.level(4), Some(Level::High));
        assert!(matches!(
            handle.write_line(16, Level::Low),
            Err(Error::InvalidLine { line: 16, count: 16 })
        ));
    }

    #[test]
    fn test_write_lines_is_one_transfer() {
        let bank = SimulatedBank::default();
        let mut handle = bank.connector().acquire(&DeviceIdentity::ft232h()).unwrap();
        handle.reset().unwrap();

        handle
            .write_lines(&[(1, Level::Low), (5, Level::Low)])
            .unwrap();
        assert_eq!(bank.stats().writes, 1);
        assert_eq!(bank.level(1), Some(Level::Low));
        assert_eq!(bank.level(5), Some(Level::Low));

        // Out-of-range lines reject the whole transfer
        assert!(matches!(
            handle.write_lines(&[(2, Level::Low), (20, Level::Low)]),
            Err(Error::InvalidLine { line: 20, .. })
        ));
        assert_eq!(bank.level(2), Some(Level::High));
        assert_eq!(bank.stats().writes, 1);
    }

    #[test]
    fn test_failed_handle_stays_failed() {
        let bank = SimulatedBank::default();
        let mut handle = bank.connector().acquire(&DeviceIdentity::ft232h()).unwrap();
        handle.reset().unwrap();

        bank.inject(Fault::Io);
        assert!(matches!(
            handle.write_line(0, Level::Low),
            Err(Error::Io { disconnected: false, .. })
        ));
        assert!(!handle.is_open());
        assert!(handle.write_line(0, Level::Low).is_err());
    }

    #[test]
    fn test_unplug_makes_handle_stale() {
        let bank = SimulatedBank::default();
        let mut handle = bank.connector().acquire(&DeviceIdentity::ft232h()).unwrap();
        bank.unplug();
        bank.plug();
        let err = handle.write_line(0, Level::Low).unwrap_err();
        assert!(err.is_disconnect());

        // A fresh handle works
        let mut fresh = bank.connector().acquire(&DeviceIdentity::ft232h()).unwrap();
        assert!(fresh.write_line(0, Level::Low).is_ok());
    }

    #[test]
    fn test_without_readback() {
        let bank = SimulatedBank::new(SimConfig {
            readback: false,
            ..SimConfig::default()
        });
        let mut handle = bank.connector().acquire(&DeviceIdentity::ft232h()).unwrap();
        assert!(!handle.supports_readback());
        assert_eq!(handle.read_line(0), Err(Error::ReadbackUnsupported));
    }

    #[test]
    fn test_parse_options() {
        let config = parse_options(&[("lines", "8"), ("readback", "off")], SimConfig::default())
            .unwrap();
        assert_eq!(config.lines, 8);
        assert!(!config.readback);
        assert!(parse_options(&[("lines", "0")], SimConfig::default()).is_err());
        assert!(parse_options(&[("readback", "maybe")], SimConfig::default()).is_err());
    }

    fn executor(bank: &SimulatedBank) -> (CommandExecutor, Arc<EventLog>) {
        let events = Arc::new(EventLog::new());
        let exec = CommandExecutor::new(
            Box::new(bank.connector()),
            DeviceIdentity::ft232h(),
            Arc::new(RelayMap::default()),
            ExecutorOptions {
                retry: RetryPolicy::new(3, Duration::from_millis(1)),
                ..ExecutorOptions::default()
            },
            events.clone(),
        )
        .unwrap();
        (exec, events)
    }

    #[test]
    fn test_executor_recovers_from_disconnect() {
        let bank = SimulatedBank::default();
        let (exec, events) = executor(&bank);
        exec.connect().unwrap();
        exec.execute(&"2".into(), RelayState::On).unwrap();
        events.take();

        bank.inject(Fault::Disconnect);
        let outcome = exec.execute(&"5".into(), RelayState::On).unwrap();
        assert_eq!(outcome.retries, 1);
        assert_eq!(bank.stats().acquisitions, 2);

        // Relay 2 was re-driven after the reset that followed re-acquisition
        assert_eq!(bank.level(2), Some(Level::Low));
        assert_eq!(bank.level(5), Some(Level::Low));

        let log = events.events();
        let lost = log
            .iter()
            .position(|e| matches!(e, Event::DeviceLost { .. }))
            .unwrap();
        let recovered = log
            .iter()
            .position(|e| matches!(e, Event::DeviceRecovered { .. }))
            .unwrap();
        assert!(lost < recovered);
    }

    #[test]
    fn test_executor_fails_fast_when_unplugged() {
        let bank = SimulatedBank::default();
        let (exec, _) = executor(&bank);
        exec.execute(&"2".into(), RelayState::On).unwrap();

        bank.unplug();
        match exec.execute(&"2".into(), RelayState::Off) {
            Err(Error::DeviceUnavailable {
                attempts,
                last_error,
                ..
            }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last_error, Error::DeviceNotFound(_)));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(
            exec.status(&"2".into()).unwrap().confirmed,
            Some(RelayState::On)
        );
        assert!(!exec.is_connected());

        bank.plug();
        assert!(exec.execute(&"2".into(), RelayState::Off).is_ok());
    }

    #[test]
    fn test_executor_verifies_with_readback() {
        let bank = SimulatedBank::default();
        let (exec, _) = executor(&bank);

        bank.inject(Fault::Stuck);
        let outcome = exec.execute(&"0".into(), RelayState::On).unwrap();
        assert_eq!(outcome.retries, 1);
        assert_eq!(bank.level(0), Some(Level::Low));
        assert!(bank.stats().reads >= 2);
    }

    #[test]
    fn test_shutdown_releases_bank() {
        let bank = SimulatedBank::default();
        let (exec, _) = executor(&bank);
        exec.execute(&"1".into(), RelayState::On).unwrap();
        exec.shutdown();
        assert_eq!(bank.level(1), Some(Level::High));
        assert!(!bank.is_claimed());
    }
}
