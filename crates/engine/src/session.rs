// SnapStep - Step-by-step program state recorder
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Debug session controller.
//!
//! Drives one target from launch to termination:
//!
//! 1. **Watch**: request class-prepare events for the entry scope
//! 2. **Arm**: once the scope is prepared, install a line step request on that thread
//! 3. **Step**: for every step inside the scope, capture a [`StepRecord`] and emit it
//! 4. **Finish**: on VM death, disconnect, timeout or the step ceiling, flush output
//!
//! Every event set that does not end the session is resumed, so the target is never
//! left suspended by the controller.
//!
//! [`StepRecord`]: snapstep_common::types::StepRecord

use std::{collections::HashSet, ops::ControlFlow, time::Duration};

use eyre::{Result, WrapErr};
use snapstep_common::types::Record;
use tracing::{debug, info, warn};

use crate::{
    CaptureMode, DebugEvent, DebugTarget, EventSet, Location, OutputInterleaver, OutputSource,
    RecordSink, SnapshotBuilder, ThreadId,
};

/// Step ceiling of a session
pub const DEFAULT_MAX_STEPS: u64 = 500;

/// Longest wait for a single event set
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit code the target is terminated with
const TERMINATE_EXIT_CODE: i32 = 0;

/// Configuration for a [`DebugSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Type whose lines are recorded
    pub entry_scope: String,
    /// Number of steps recorded before the target is terminated
    pub max_steps: u64,
    /// Longest wait for a single event set before the session ends
    pub event_timeout: Duration,
    /// How captured output is attached to records
    pub capture_mode: CaptureMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            entry_scope: "Main".into(),
            max_steps: DEFAULT_MAX_STEPS,
            event_timeout: DEFAULT_EVENT_TIMEOUT,
            capture_mode: CaptureMode::default(),
        }
    }
}

impl SessionConfig {
    /// Configuration recording `entry_scope` with default bounds
    pub fn new(entry_scope: impl Into<String>) -> Self {
        Self { entry_scope: entry_scope.into(), ..Default::default() }
    }

    /// Set the step ceiling
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set the per-wait event timeout
    pub fn with_event_timeout(mut self, timeout: Duration) -> Self {
        self.event_timeout = timeout;
        self
    }

    /// Set the capture mode
    pub fn with_capture_mode(mut self, mode: CaptureMode) -> Self {
        self.capture_mode = mode;
        self
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The target died or disconnected
    Completed,
    /// No event arrived within the event timeout
    TimedOut,
    /// Waiting for or resuming after an event failed
    Interrupted,
    /// The step ceiling was crossed and the target terminated
    StepLimitExceeded,
}

/// Controller of one debug session
pub struct DebugSession<T, O, S> {
    target: T,
    output: OutputInterleaver<O>,
    sink: S,
    config: SessionConfig,
    steps: u64,
    stepping_threads: HashSet<ThreadId>,
}

impl<T, O, S> DebugSession<T, O, S>
where
    T: DebugTarget,
    O: OutputSource,
    S: RecordSink,
{
    /// Create a session over a launched, suspended target
    pub fn new(target: T, output: O, sink: S, config: SessionConfig) -> Self {
        let output = OutputInterleaver::new(output, config.capture_mode);
        Self { target, output, sink, config, steps: 0, stepping_threads: HashSet::new() }
    }

    /// Run the session to completion.
    ///
    /// Only a failing sink or a target that refuses the initial watch is an error; the
    /// target is terminated in that case. Everything else ends the session with a
    /// [`SessionOutcome`].
    pub fn run(&mut self) -> Result<SessionOutcome> {
        info!(
            scope = %self.config.entry_scope,
            max_steps = self.config.max_steps,
            timeout = ?self.config.event_timeout,
            "Starting debug session"
        );

        let outcome = match self.drive() {
            Ok(outcome) => outcome,
            Err(e) => {
                self.shutdown();
                return Err(e);
            }
        };

        self.output.drain();
        if let Some(output) = self.output.trailing() {
            self.sink.emit(&Record::stdout(output)).wrap_err("failed to emit trailing output")?;
        }

        info!(?outcome, steps = self.steps, "Debug session finished");
        Ok(outcome)
    }

    /// Steps observed so far, including the one that crossed the ceiling
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// The target being driven
    pub fn target(&self) -> &T {
        &self.target
    }

    /// The record sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Tear the session apart into its target and sink
    pub fn into_parts(self) -> (T, S) {
        (self.target, self.sink)
    }

    fn drive(&mut self) -> Result<SessionOutcome> {
        self.target
            .watch_class_prepare(&self.config.entry_scope)
            .wrap_err("failed to watch for the entry scope")?;

        loop {
            let events = match self.target.next_event_set(self.config.event_timeout) {
                Ok(Some(events)) => events,
                Ok(None) => {
                    info!(timeout = ?self.config.event_timeout, "No event arrived, ending session");
                    return Ok(SessionOutcome::TimedOut);
                }
                Err(e) => {
                    warn!(error = %e, "Waiting for events failed, ending session");
                    return Ok(SessionOutcome::Interrupted);
                }
            };

            if let ControlFlow::Break(outcome) = self.dispatch(events)? {
                return Ok(outcome);
            }

            if let Err(e) = self.target.resume() {
                warn!(error = %e, "Resuming the target failed, ending session");
                return Ok(SessionOutcome::Interrupted);
            }
        }
    }

    fn dispatch(&mut self, events: EventSet) -> Result<ControlFlow<SessionOutcome>> {
        for event in events.events {
            match event {
                DebugEvent::ClassPrepare { thread, type_name }
                    if type_name == self.config.entry_scope =>
                {
                    self.arm(thread);
                }
                DebugEvent::Step { thread, location }
                    if location.declaring_type.name == self.config.entry_scope =>
                {
                    if let ControlFlow::Break(outcome) = self.on_step(thread, &location)? {
                        return Ok(ControlFlow::Break(outcome));
                    }
                }
                DebugEvent::VmDeath | DebugEvent::VmDisconnect => {
                    debug!("Target is gone");
                    return Ok(ControlFlow::Break(SessionOutcome::Completed));
                }
                other => debug!(event = ?other, "Ignoring event"),
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    fn arm(&mut self, thread: ThreadId) {
        if !self.stepping_threads.insert(thread) {
            return;
        }
        match self.target.enable_line_steps(thread, &self.config.entry_scope) {
            Ok(()) => {
                info!(thread, scope = %self.config.entry_scope, "Entry scope prepared, stepping")
            }
            Err(e) => {
                warn!(thread, error = %e, "Failed to install step request");
                self.stepping_threads.remove(&thread);
            }
        }
    }

    fn on_step(
        &mut self,
        thread: ThreadId,
        location: &Location,
    ) -> Result<ControlFlow<SessionOutcome>> {
        self.steps += 1;
        if self.steps > self.config.max_steps {
            warn!(limit = self.config.max_steps, "Step limit exceeded, terminating target");
            self.sink
                .emit(&Record::step_limit_exceeded(self.config.max_steps))
                .wrap_err("failed to emit step limit error")?;
            if let Err(e) = self.target.terminate(TERMINATE_EXIT_CODE) {
                warn!(error = %e, "Failed to terminate target");
            }
            return Ok(ControlFlow::Break(SessionOutcome::StepLimitExceeded));
        }

        self.output.drain();
        let stdout = self.output.pending();
        let builder = SnapshotBuilder::new(&mut self.target, &self.config.entry_scope);
        match builder.build(thread, location, self.steps, stdout) {
            Ok(record) => {
                self.output.mark_attached();
                debug!(step = self.steps, %location, "Captured step");
                self.sink.emit(&Record::Frame(record)).wrap_err("failed to emit step record")?;
            }
            Err(e) => debug!(step = self.steps, %location, error = %e, "Skipping step"),
        }
        Ok(ControlFlow::Continue(()))
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.target.terminate(TERMINATE_EXIT_CODE) {
            debug!(error = %e, "Failed to terminate target during shutdown");
        }
    }
}
