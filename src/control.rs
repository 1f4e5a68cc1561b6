//! The daemon's main loop: dispatch queued commands, mirror device state, give up
//! after too many consecutive failures.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    error::{Error, Result},
    psu::E3631,
    scheduler::{Events, IntervalScheduler},
    storage::Storage,
    transport::SerialLine,
    types::{Command, CommandKind, Milli, State},
};

/// Counts failed operations in a row. Any success resets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCounter {
    count: u32,
    threshold: u32,
}

impl FailureCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Count `err`, handing it back once the threshold is reached.
    pub fn record(&mut self, err: Error) -> Result<()> {
        self.count += 1;
        warn!(count = self.count, threshold = self.threshold, error = %err, "operation failed");
        if self.count >= self.threshold {
            return Err(err);
        }
        Ok(())
    }
}

enum Outcome {
    /// Nothing to do, neither success nor failure.
    Idle,
    Done,
    Failed(Error),
}

/// A dispatched command whose result could not be stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Unclosed {
    id: i64,
    result: String,
}

/// Owns the engine and the storage for the lifetime of the loop.
pub struct Controller<S: SerialLine, D: Storage, const L: usize = 128> {
    psu: E3631<S, L>,
    storage: D,
    scheduler: IntervalScheduler,
    failures: FailureCounter,
    /// Only the close is retried for this one, never the device operation.
    unclosed: Option<Unclosed>,
}

impl<S: SerialLine, D: Storage, const L: usize> Controller<S, D, L> {
    pub fn new(
        psu: E3631<S, L>,
        storage: D,
        scheduler: IntervalScheduler,
        failure_threshold: u32,
    ) -> Self {
        Self {
            psu,
            storage,
            scheduler,
            failures: FailureCounter::new(failure_threshold),
            unclosed: None,
        }
    }

    pub fn from_config(psu: E3631<S, L>, storage: D, config: &Config) -> Self {
        let scheduler =
            IntervalScheduler::new(config.command_interval(), config.update_interval())
                .with_tolerance(config.timing.tolerance());
        Self::new(psu, storage, scheduler, config.failure_threshold)
    }

    /// Run until `shutdown` is set (`Ok`) or the failure threshold is reached
    /// (the last failure is returned). The mirrored state is cleared either way.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        info!("control loop started");
        self.scheduler.restart();
        let outcome = self.run_until(shutdown);
        match &outcome {
            Ok(()) => info!("control loop stopped"),
            Err(err) => {
                error!(
                    error = %err,
                    failures = self.failures.count(),
                    "too many consecutive failures, giving up"
                );
                self.psu.transactions().dump();
            }
        }
        if let Err(err) = self.storage.clear_state() {
            warn!(error = %err, "could not clear mirrored state");
        }
        outcome
    }

    fn run_until(&mut self, shutdown: &AtomicBool) -> Result<()> {
        while !shutdown.load(Ordering::Relaxed) {
            let events = self.scheduler.wait_next();
            self.handle(events)?;
        }
        Ok(())
    }

    /// Process one set of due events.
    pub fn handle(&mut self, events: Events) -> Result<()> {
        if events.contains(Events::COMMAND) {
            let outcome = self.poll_command();
            self.account(outcome)?;
        }
        if events.contains(Events::UPDATE) {
            let outcome = self.update_state();
            self.account(outcome)?;
        }
        Ok(())
    }

    fn account(&mut self, outcome: Outcome) -> Result<()> {
        match outcome {
            Outcome::Idle => Ok(()),
            Outcome::Done => {
                self.failures.reset();
                Ok(())
            }
            Outcome::Failed(err) => self.failures.record(err),
        }
    }

    fn poll_command(&mut self) -> Outcome {
        if let Some(unclosed) = self.unclosed.take() {
            return self.close(unclosed, None);
        }

        let command = match self.storage.next_pending_command() {
            Ok(Some(command)) => command,
            Ok(None) => return Outcome::Idle,
            Err(err) => return Outcome::Failed(err),
        };

        match self.dispatch(&command) {
            Ok(result) => {
                info!(id = command.id, kind = %command.kind, value = %command.value, %result, "command done");
                self.close(Unclosed { id: command.id, result }, None)
            }
            Err(err) => {
                warn!(id = command.id, kind = %command.kind, value = %command.value, error = %err, "command failed");
                let result = err.to_string().replace('\n', "\\n");
                self.close(Unclosed { id: command.id, result }, Some(err))
            }
        }
    }

    /// Store a command's result. On failure the result is kept for the next poll.
    fn close(&mut self, unclosed: Unclosed, dispatch_error: Option<Error>) -> Outcome {
        match self.storage.close_command(unclosed.id, &unclosed.result) {
            Ok(()) => match dispatch_error {
                Some(err) => Outcome::Failed(err),
                None => Outcome::Done,
            },
            Err(err) => {
                warn!(id = unclosed.id, error = %err, "could not close command, will retry");
                self.unclosed = Some(unclosed);
                Outcome::Failed(err)
            }
        }
    }

    /// Execute one command, returning what the device reports afterwards.
    pub fn dispatch(&mut self, command: &Command) -> Result<String> {
        match command.kind {
            CommandKind::SetVoltage => {
                let volts = parse_value::<Milli>(command)?;
                Ok(self.psu.set_voltage(volts)?.to_string())
            }
            CommandKind::SetCurrentLimit => {
                let amps = parse_value::<Milli>(command)?;
                Ok(self.psu.set_current_limit(amps)?.to_string())
            }
            CommandKind::SetPower => {
                let state = parse_value::<State>(command)?;
                let on = self.psu.set_power(state.into())?;
                Ok(State::from(on).to_string())
            }
        }
    }

    fn update_state(&mut self) -> Outcome {
        let mirrored = self.psu.state().and_then(|state| {
            debug!(?state, "mirroring");
            self.storage.mirror_state(&state)
        });
        match mirrored {
            Ok(()) => Outcome::Done,
            Err(err) => Outcome::Failed(err),
        }
    }

    pub fn psu(&self) -> &E3631<S, L> {
        &self.psu
    }

    pub fn psu_mut(&mut self) -> &mut E3631<S, L> {
        &mut self.psu
    }

    pub fn storage(&self) -> &D {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut D {
        &mut self.storage
    }

    pub fn scheduler_mut(&mut self) -> &mut IntervalScheduler {
        &mut self.scheduler
    }

    pub fn failures(&self) -> &FailureCounter {
        &self.failures
    }

    pub fn into_parts(self) -> (E3631<S, L>, D) {
        (self.psu, self.storage)
    }
}

fn parse_value<T: core::str::FromStr>(command: &Command) -> Result<T> {
    command
        .value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidValue {
            kind: command.kind,
            value: command.value.clone(),
        })
}
