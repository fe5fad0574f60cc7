//! Scripted in-memory adapter for unit tests

use std::collections::VecDeque;
use std::sync::{Arc, Barrier};
use std::time::Instant;

use parking_lot::Mutex;

use crate::device::{DeviceConnector, DeviceIdentity, Level, LineAddress, RelayDevice};
use crate::error::{Error, Result};

const LINES: u8 = 16;

/// Failure injected into the next write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    /// Transfer error, handle stays attached
    Io,
    /// Transfer error, adapter went away
    Disconnect,
    /// Write succeeds but the next read-back reports the opposite level
    Stuck,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FakeStats {
    pub acquisitions: u32,
    pub resets: u32,
    pub writes: u32,
    pub reads: u32,
    pub closes: u32,
}

#[derive(Debug)]
struct Shared {
    present: bool,
    readback: bool,
    levels: [Level; LINES as usize],
    faults: VecDeque<WriteFault>,
    stuck_reads: u32,
    gate: Option<Arc<Barrier>>,
    log: Vec<(LineAddress, Level)>,
    stats: FakeStats,
}

/// Handle on the shared fake state, kept by the test
#[derive(Debug, Clone)]
pub struct FakeBank {
    shared: Arc<Mutex<Shared>>,
}

impl FakeBank {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                present: true,
                readback: false,
                levels: [Level::Low; LINES as usize],
                faults: VecDeque::new(),
                stuck_reads: 0,
                gate: None,
                log: Vec::new(),
                stats: FakeStats::default(),
            })),
        }
    }

    pub fn with_readback() -> Self {
        let bank = Self::new();
        bank.shared.lock().readback = true;
        bank
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn stats(&self) -> FakeStats {
        self.shared.lock().stats
    }

    pub fn level(&self, line: LineAddress) -> Level {
        self.shared.lock().levels[line as usize]
    }

    pub fn writes_to(&self, line: LineAddress) -> Vec<Level> {
        self.shared
            .lock()
            .log
            .iter()
            .filter(|(l, _)| *l == line)
            .map(|(_, level)| *level)
            .collect()
    }

    pub fn fail_writes(&self, faults: impl IntoIterator<Item = WriteFault>) {
        self.shared.lock().faults.extend(faults);
    }

    /// Park the next write inside the handle
    ///
    /// The writing thread meets the returned barrier once on entering the
    /// write and again before applying it, so the test knows the command is
    /// in flight between its two `wait` calls.
    pub fn gate_next_write(&self) -> Arc<Barrier> {
        let gate = Arc::new(Barrier::new(2));
        self.shared.lock().gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn unplug(&self) {
        self.shared.lock().present = false;
    }

    pub fn plug(&self) {
        self.shared.lock().present = true;
    }
}

pub struct FakeConnector {
    shared: Arc<Mutex<Shared>>,
}

impl DeviceConnector for FakeConnector {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn line_count(&self) -> u8 {
        LINES
    }

    fn acquire(&mut self, identity: &DeviceIdentity) -> Result<Box<dyn RelayDevice>> {
        let mut shared = self.shared.lock();
        if !shared.present {
            return Err(Error::DeviceNotFound(identity.clone()));
        }
        shared.stats.acquisitions += 1;
        Ok(Box::new(FakeHandle {
            shared: Arc::clone(&self.shared),
            open: true,
            failed: false,
            last_reset: None,
        }))
    }
}

struct FakeHandle {
    shared: Arc<Mutex<Shared>>,
    open: bool,
    failed: bool,
    last_reset: Option<Instant>,
}

impl FakeHandle {
    fn check(&self) -> Result<()> {
        if !self.open || self.failed {
            return Err(Error::handle_closed());
        }
        Ok(())
    }

    fn apply(&mut self, lines: &[(LineAddress, Level)]) -> Result<()> {
        self.check()?;
        let gate = self.shared.lock().gate.take();
        if let Some(gate) = gate {
            gate.wait();
            gate.wait();
        }

        let mut shared = self.shared.lock();
        shared.stats.writes += 1;
        match shared.faults.pop_front() {
            Some(WriteFault::Io) => {
                self.failed = true;
                return Err(Error::io("scripted transfer error"));
            }
            Some(WriteFault::Disconnect) => {
                self.failed = true;
                return Err(Error::disconnected("scripted disconnect"));
            }
            Some(WriteFault::Stuck) => shared.stuck_reads += 1,
            None => {}
        }
        for &(line, level) in lines {
            shared.levels[line as usize] = level;
            shared.log.push((line, level));
        }
        Ok(())
    }
}

impl RelayDevice for FakeHandle {
    fn line_count(&self) -> u8 {
        LINES
    }

    fn is_open(&self) -> bool {
        self.open && !self.failed
    }

    fn last_reset(&self) -> Option<Instant> {
        self.last_reset
    }

    fn reset(&mut self) -> Result<()> {
        self.check()?;
        let mut shared = self.shared.lock();
        shared.levels = [Level::High; LINES as usize];
        shared.stats.resets += 1;
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
        self.shared.lock().readback
    }

    fn read_line(&mut self, line: LineAddress) -> Result<Level> {
        self.check()?;
        let mut shared = self.shared.lock();
        shared.stats.reads += 1;
        let level = shared.levels[line as usize];
        if shared.stuck_reads > 0 {
            shared.stuck_reads -= 1;
            return Ok(!level);
        }
        Ok(level)
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.shared.lock().stats.closes += 1;
        }
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.close();
    }
}
