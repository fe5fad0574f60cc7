//! Sequence runner

use std::iter::Enumerate;
use std::vec;

use super::{Sequence, SequenceStep};
use crate::cancel::CancelToken;
use crate::error::Result;
use crate::events::Event;
use crate::executor::{CommandExecutor, CommandOutcome};

/// What to do when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Report the failure and carry on with the next step
    #[default]
    Continue,
    /// Stop the run after the first failed step
    AbortOnFirstFailure,
}

/// Result of one executed step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    /// Zero-based position in the sequence
    pub index: usize,
    /// The step that was executed
    pub step: SequenceStep,
    /// Executor outcome
    pub outcome: Result<CommandOutcome>,
}

impl StepResult {
    /// Whether the step succeeded
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Drives sequences through a [`CommandExecutor`]
#[derive(Clone)]
pub struct SequenceRunner<'a> {
    executor: &'a CommandExecutor,
    policy: FailurePolicy,
    cancel: CancelToken,
}

impl<'a> SequenceRunner<'a> {
    /// Runner with the default policy and a fresh cancel token
    pub fn new(executor: &'a CommandExecutor) -> Self {
        Self {
            executor,
            policy: FailurePolicy::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Set the failure policy
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use an existing cancel token
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels runs started by this runner
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Start a run
    ///
    /// Nothing happens until the returned iterator is polled; each call to
    /// `next` waits out the step delay and executes one step.
    pub fn run(&self, sequence: Sequence) -> SequenceRun<'a> {
        log::info!(
            "Running {} step(s) from {}",
            sequence.len(),
            sequence.source()
        );
        SequenceRun {
            executor: self.executor,
            policy: self.policy,
            cancel: self.cancel.clone(),
            total: sequence.len(),
            steps: sequence.into_iter().enumerate(),
            completed: 0,
            finished: false,
            aborted: false,
            cancelled: false,
        }
    }
}

/// A run in progress, yielding one [`StepResult`] per executed step
pub struct SequenceRun<'a> {
    executor: &'a CommandExecutor,
    policy: FailurePolicy,
    cancel: CancelToken,
    total: usize,
    steps: Enumerate<vec::IntoIter<SequenceStep>>,
    completed: usize,
    finished: bool,
    aborted: bool,
    cancelled: bool,
}

impl SequenceRun<'_> {
    /// Number of steps in the sequence
    pub fn total(&self) -> usize {
        self.total
    }

    /// Steps executed so far
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Whether the run stopped on a failed step
    pub fn was_aborted(&self) -> bool {
        self.aborted
    }

    /// Whether the run stopped because it was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    fn stop_cancelled(&mut self) {
        self.finished = true;
        self.cancelled = true;
        log::info!(
            "Sequence cancelled after {} of {} step(s)",
            self.completed,
            self.total
        );
    }
}

impl Iterator for SequenceRun<'_> {
    type Item = StepResult;

    fn next(&mut self) -> Option<StepResult> {
        if self.finished {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.stop_cancelled();
            return None;
        }

        let Some((index, step)) = self.steps.next() else {
            self.finished = true;
            return None;
        };

        if let Some(delay) = step.delay {
            if self.cancel.wait(delay) {
                self.stop_cancelled();
                return None;
            }
        }

        let outcome = self.executor.execute(&step.relay, step.state);
        self.completed += 1;
        self.executor.emit(Event::StepCompleted {
            index,
            row: step.row,
            relay: step.relay.clone(),
            state: step.state,
            error: outcome.as_ref().err().map(ToString::to_string),
        });

        if outcome.is_err() && self.policy == FailurePolicy::AbortOnFirstFailure {
            log::warn!("Aborting sequence at step {}", index + 1);
            self.finished = true;
            self.aborted = true;
        }

        Some(StepResult {
            index,
            step,
            outcome,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            (0, Some(0))
        } else {
            (0, Some(self.total - self.completed))
        }
    }
}
