//! RelayBank - configuration, executor and sequence control in one handle
//!
//! The bank owns everything a caller needs to drive one adapter: the relay
//! map built from the configuration, the command executor (and through it
//! the state store), and the cancel token of the sequence that is currently
//! running.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relayctl_core::cancel::CancelToken;
use relayctl_core::config::Config;
use relayctl_core::device::{DeviceConnector, DeviceIdentity};
use relayctl_core::error::Result;
use relayctl_core::events::EventSink;
use relayctl_core::executor::{CommandExecutor, CommandOutcome};
use relayctl_core::map::{RelayId, RelayMap, RelayState};
use relayctl_core::sequence::{
    self, FailurePolicy, Sequence, SequenceError, SequenceRun, SequenceRunner,
};
use relayctl_core::state::RelayStatus;

use crate::registry::open_connector;

/// Handle on one relay bank
///
/// Commands and sequence runs borrow the bank immutably, so it can be shared
/// between the thread that runs a sequence and one that cancels it.
pub struct RelayBank {
    config: Config,
    backend: &'static str,
    executor: CommandExecutor,
    active_run: Mutex<Option<CancelToken>>,
}

impl RelayBank {
    /// Open a bank on the backend named by `backend` (see
    /// [`parse_backend_params`](crate::parse_backend_params))
    ///
    /// The adapter is acquired right away. If that fails the bank still
    /// opens in degraded mode and every command retries the acquisition.
    pub fn open(config: Config, backend: &str, sink: Arc<dyn EventSink>) -> Result<Self> {
        let connector = open_connector(backend, &config)?;
        Self::with_connector(config, connector, sink)
    }

    /// Open a bank on an already constructed connector
    pub fn with_connector(
        config: Config,
        connector: Box<dyn DeviceConnector>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let backend = connector.name();
        let map = Arc::new(config.relay_map()?);
        let executor = CommandExecutor::new(
            connector,
            config.identity(),
            map,
            config.executor_options(),
            sink,
        )?;

        if let Err(e) = executor.connect() {
            log::warn!("Adapter not available, starting in degraded mode: {}", e);
        }

        Ok(Self {
            config,
            backend,
            executor,
            active_run: Mutex::new(None),
        })
    }

    /// Configuration the bank was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Name of the backend in use
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Identity of the adapter
    pub fn identity(&self) -> &DeviceIdentity {
        self.executor.identity()
    }

    /// Relay map
    pub fn map(&self) -> &RelayMap {
        self.executor.map()
    }

    /// Underlying executor
    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// Whether an adapter handle is currently open
    pub fn is_connected(&self) -> bool {
        self.executor.is_connected()
    }

    /// Retry acquiring the adapter
    pub fn connect(&self) -> Result<()> {
        self.executor.connect()
    }

    /// Drive one relay into `state`
    pub fn set(&self, id: &RelayId, state: RelayState) -> Result<CommandOutcome> {
        self.executor.execute(id, state)
    }

    /// Press a relay for `duration`, or the configured pulse length
    pub fn pulse(&self, id: &RelayId, duration: Option<Duration>) -> Result<CommandOutcome> {
        let duration = duration.unwrap_or_else(|| self.config.pulse_duration());
        self.executor.pulse(id, duration)
    }

    /// Drive several relays into `state` with one adapter write
    pub fn set_many(&self, ids: &[RelayId], state: RelayState) -> Result<Vec<CommandOutcome>> {
        self.executor.execute_many(ids, state)
    }

    /// Press several relays together for `duration`, or the configured
    /// pulse length
    pub fn press(&self, ids: &[RelayId], duration: Option<Duration>) -> Result<Vec<CommandOutcome>> {
        let duration = duration.unwrap_or_else(|| self.config.pulse_duration());
        self.executor.press(ids, duration)
    }

    /// Pulse every relay in map order with the configured gap between them
    pub fn sweep(&self, duration: Option<Duration>) -> Vec<(RelayId, Result<CommandOutcome>)> {
        let duration = duration.unwrap_or_else(|| self.config.pulse_duration());
        self.executor.pulse_all(duration, self.config.sweep_gap())
    }

    /// Command every relay off
    pub fn all_off(&self) -> Vec<(RelayId, Result<CommandOutcome>)> {
        self.executor.all_off()
    }

    /// State record of one relay
    pub fn status(&self, id: &RelayId) -> Result<RelayStatus> {
        self.executor.status(id)
    }

    /// Copy of every state record, in map order
    pub fn snapshot(&self) -> Vec<(RelayId, RelayStatus)> {
        self.executor.snapshot()
    }

    /// Load a sequence file using the configured format
    pub fn load_sequence(
        &self,
        path: impl AsRef<Path>,
    ) -> std::result::Result<Sequence, SequenceError> {
        sequence::load_sequence(path, self.map(), &self.config.sequence_format())
    }

    /// Parse a sequence from any reader using the configured format
    pub fn parse_sequence<R: Read>(
        &self,
        reader: R,
        source: &str,
    ) -> std::result::Result<Sequence, SequenceError> {
        sequence::parse_sequence(reader, source, self.map(), &self.config.sequence_format())
    }

    /// Start running a sequence
    ///
    /// `policy` defaults to the configured one. The returned iterator
    /// executes one step per call to `next`; [`cancel`](Self::cancel) stops
    /// it before the next step.
    pub fn run_sequence(
        &self,
        sequence: Sequence,
        policy: Option<FailurePolicy>,
    ) -> SequenceRun<'_> {
        let token = CancelToken::new();
        if let Some(previous) = self.active_run.lock().replace(token.clone()) {
            previous.cancel();
        }

        SequenceRunner::new(&self.executor)
            .with_policy(policy.unwrap_or_else(|| self.config.failure_policy()))
            .with_cancel(token)
            .run(sequence)
    }

    /// Cancel the running sequence
    ///
    /// Returns `false` when no sequence was started.
    pub fn cancel(&self) -> bool {
        match self.active_run.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel any sequence, then release the adapter
    ///
    /// Idempotent; afterwards every command fails with
    /// [`Error::Closed`](relayctl_core::Error::Closed).
    pub fn shutdown(&self) {
        if let Some(token) = self.active_run.lock().take() {
            token.cancel();
        }
        self.executor.shutdown();
    }
}

impl Drop for RelayBank {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RelayBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayBank")
            .field("backend", &self.backend)
            .field("identity", self.identity())
            .field("relays", &self.map().len())
            .field("connected", &self.is_connected())
            .finish()
    }
}
